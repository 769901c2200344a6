//! Language-model integration: the streaming chat client and the per-call
//! conversation store it reads from.

pub mod client;
pub mod conversation;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use client::LlmClient;
pub use conversation::{ChatMessage, Conversation, Role, DEFAULT_SYSTEM_PROMPT};

/// Process-wide language-model seam: a streaming chat completion.
///
/// The response pipeline only ever consumes tokens through the returned
/// channel, so tests swap in scripted models and production uses
/// [`LlmClient`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        LlmClient::stream_chat(self, messages).await
    }
}
