//! Per-call conversation history.
//!
//! Holds the system prompt plus a bounded log of user/assistant messages,
//! formatted for the chat-completion API. When an agent response is cut off
//! by barge-in, only the text whose audio was actually queued is recorded,
//! with a trailing `[interrupted]` marker so the model knows it was cut off.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly and natural-sounding AI phone assistant. \
    Keep your responses concise and conversational - you're on a phone call, not writing an essay. \
    Respond in 1-3 sentences unless the caller asks for detail. \
    Do not use markdown, bullet points, or code blocks - your responses will be spoken aloud. \
    Be warm, helpful, and speak naturally like a real person would on the phone.";

pub const INTERRUPTED_MARKER: &str = "[interrupted]";

/// Maximum user+assistant messages kept after the system prompt.
pub const MAX_HISTORY_MESSAGES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub struct Conversation {
    system_prompt: String,
    history: Vec<ChatMessage>,
    max_history: usize,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string(),
            history: Vec::new(),
            max_history: MAX_HISTORY_MESSAGES,
        }
    }

    /// Record a user turn (the ASR final transcript). Whitespace-only text
    /// is ignored.
    pub fn add_user(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.history.push(ChatMessage::user(text));
        self.trim();
    }

    /// Record a fully delivered assistant response.
    pub fn add_assistant(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.history.push(ChatMessage::assistant(text));
        self.trim();
    }

    /// Record an interrupted assistant response: only the spoken portion,
    /// marked so the model knows the rest was never heard.
    pub fn add_assistant_partial(&mut self, spoken_text: &str) {
        let spoken = spoken_text.trim();
        if spoken.is_empty() {
            return;
        }
        self.history
            .push(ChatMessage::assistant(format!("{spoken} {INTERRUPTED_MARKER}")));
        self.trim();
        debug!("recorded partial assistant message ({} chars)", spoken.len());
    }

    /// System prompt followed by the bounded history, ready for the LLM.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.history.len() + 1);
        out.push(ChatMessage::system(self.system_prompt.clone()));
        out.extend(self.history.iter().cloned());
        out
    }

    /// Number of user turns so far.
    pub fn turn_count(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }

    /// Drop the history, keep the system prompt.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn trim(&mut self) {
        while self.history.len() > self.max_history {
            let removed = self.history.remove(0);
            debug!("trimmed oldest {:?} message", removed.role);
        }
    }
}
