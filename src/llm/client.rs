//! Streaming chat-completion client.
//!
//! Talks to any OpenAI-compatible endpoint (vLLM, OpenRouter, hosted APIs)
//! and streams response tokens over a channel so the response pipeline can
//! react to — and be cancelled between — individual deltas.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::LlmConfig;
use crate::llm::conversation::ChatMessage;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Process-wide LLM client, safe to share across calls.
#[derive(Clone)]
pub struct LlmClient {
    client: Arc<reqwest::Client>,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: Arc::new(reqwest::Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Start a streaming completion. Returns a channel of text deltas.
    ///
    /// Fails before yielding anything if the endpoint rejects the request;
    /// a mid-stream failure arrives as an `Err` item on the channel. The
    /// channel closes when the stream ends or the receiver is dropped.
    pub async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("failed to send streaming request to LLM endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM streaming API error ({status}): {body}");
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        error!("LLM stream read error: {e}");
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                for data in drain_sse_events(&mut buffer) {
                    if data == "[DONE]" {
                        debug!("LLM stream complete");
                        return;
                    }
                    if let Some(token) = delta_content(&data) {
                        if tx.send(Ok(token)).await.is_err() {
                            // Receiver gone: response was cancelled.
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Split complete SSE events off the front of `buffer`, returning their
/// `data:` payloads. Incomplete trailing data stays buffered.
fn drain_sse_events(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let event: String = buffer.drain(..pos + 2).collect();
        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                out.push(data.to_string());
            }
        }
    }
    out
}

/// Extract the text delta from one SSE data payload, if any.
fn delta_content(data: &str) -> Option<String> {
    let parsed: StreamResponse = serde_json::from_str(data).ok()?;
    parsed.choices.first()?.delta.content.clone()
}
