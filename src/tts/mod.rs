//! Speech synthesis.
//!
//! The synthesizer is a process-wide seam: it takes a sentence of text and
//! streams 24 kHz mono i16 PCM chunks back over a channel. Dropping the
//! receiver cancels the synthesis. Downstream conversion to wire frames
//! lives in [`stream`].

pub mod http;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use http::HttpTts;
pub use stream::{PayloadFramer, Sentence, SentenceChunker};

/// One chunk of synthesized audio: mono i16 PCM at [`TtsConfig::sample_rate`].
pub type PcmChunk = Vec<i16>;

#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis engine name (currently "http").
    pub engine: String,
    pub voice: String,
    /// Speech rate adjustment, e.g. "+0%" or "-10%".
    pub rate: String,
    pub base_url: String,
    /// Native output sample rate of the engine.
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: "http".to_string(),
            voice: "af_heart".to_string(),
            rate: "+0%".to_string(),
            base_url: "http://localhost:3001".to_string(),
            sample_rate: 24_000,
        }
    }
}

/// Process-wide text-to-speech backend, shared across calls.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one piece of text, streaming PCM chunks as they become
    /// available. The channel closes when synthesis completes; an `Err`
    /// item reports a mid-synthesis failure.
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<PcmChunk>>>;
}
