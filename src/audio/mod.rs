//! Audio plumbing: μ-law codec, sample-rate conversion, and the outbound
//! sender that paces frames back to the provider.

pub mod codec;
pub mod resample;
pub mod streamer;

pub use codec::{f32_to_pcm, mulaw_to_pcm, pcm_to_f32, pcm_to_mulaw};
pub use streamer::{AudioStreamer, EnqueueError, FRAME_INTERVAL, QUEUE_CAPACITY};

/// Samples in one 20 ms wire frame at 8 kHz.
pub const WIRE_FRAME_SAMPLES: usize = 160;
