//! Real-time conversational voice gateway.
//!
//! Terminates a telephony provider's bidirectional μ-law/WebSocket audio
//! stream and places a synthetic agent in the loop:
//! - inbound audio is decoded, resampled, and fed to VAD + streaming ASR
//! - a voice-activity state machine decides when the caller's turn is over
//! - each turn runs a cancellable LLM → TTS → outbound-audio pipeline
//! - barge-in preempts an in-flight response the moment the caller speaks,
//!   keeping the conversation history consistent with what was heard
//!
//! Many calls run concurrently in one process; models are shared, per-call
//! state is owned by each call's [`session::CallSession`].

pub mod audio;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod server;
pub mod session;
pub mod stt;
pub mod telephony;
pub mod tts;
pub mod vad;

pub use config::Config;
pub use metrics::Metrics;
pub use session::{CallSession, Gateway};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
