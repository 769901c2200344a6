//! Streaming speech-to-text.
//!
//! The model is process-wide; each call owns an [`AsrSession`] holding the
//! per-turn decoding state. Sessions are blocking/CPU-heavy by contract, so
//! the [`TranscriptionFeeder`] dispatches every operation through the
//! blocking pool — the call's frame pump never stalls on a decode.
//!
//! Between turns the session resets itself in `finalize`, so no audio or
//! hypothesis from one turn bleeds into the next.

pub mod whisper_cli;

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::audio::pcm_to_f32;

pub use whisper_cli::WhisperCli;

/// Process-wide ASR model handle, shared across calls.
pub trait SpeechToText: Send + Sync {
    /// Open per-call decoding state over the shared model.
    fn start_session(&self) -> Box<dyn AsrSession>;
}

/// Per-call streaming ASR state. All methods are blocking.
pub trait AsrSession: Send {
    /// Feed normalized 16 kHz audio in [-1, 1]. Returns a stabilized
    /// partial transcript when one becomes available.
    fn accept_audio(&mut self, samples: &[f32]) -> Result<Option<String>>;

    /// Produce the final transcript for the turn and reset for the next one.
    fn finalize(&mut self) -> Result<String>;
}

/// Feeds caller speech into an ASR session from the async call path.
pub struct TranscriptionFeeder {
    stream_sid: String,
    session: Arc<Mutex<Box<dyn AsrSession>>>,
}

impl TranscriptionFeeder {
    pub fn new(asr: &Arc<dyn SpeechToText>, stream_sid: &str) -> Self {
        Self {
            stream_sid: stream_sid.to_string(),
            session: Arc::new(Mutex::new(asr.start_session())),
        }
    }

    /// Feed one chunk of 16 kHz PCM. Partial transcripts are logged and
    /// returned as they stabilize.
    pub async fn push(&self, pcm_16k: Vec<i16>) -> Result<Option<String>> {
        let session = self.session.clone();
        let partial = tokio::task::spawn_blocking(move || {
            let samples = pcm_to_f32(&pcm_16k);
            session.lock().unwrap().accept_audio(&samples)
        })
        .await
        .context("ASR worker panicked")??;

        if let Some(text) = &partial {
            info!(stream_sid = %self.stream_sid, "partial transcript: {text:?}");
        }
        Ok(partial)
    }

    /// Close out the turn: final transcript, session reset.
    pub async fn finalize_turn(&self) -> Result<String> {
        let session = self.session.clone();
        let text = tokio::task::spawn_blocking(move || session.lock().unwrap().finalize())
            .await
            .context("ASR worker panicked")??;

        info!(stream_sid = %self.stream_sid, "final transcript: {text:?}");
        Ok(text)
    }
}
