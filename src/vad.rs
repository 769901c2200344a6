//! Voice-activity-driven turn detection.
//!
//! Inbound 16 kHz PCM accumulates into 512-sample windows (32 ms); each
//! complete window is scored by a [`SpeechClassifier`] and folded into the
//! speech/silence state machine:
//!
//! ```text
//! silent → (speech ≥ min_speech) → speaking → (silence ≥ min_silence) → complete
//! ```
//!
//! A turn completes only when the caller actually spoke long enough AND then
//! went quiet long enough; sub-threshold flicker never emits a turn. The
//! caller resets the detector after consuming a completed turn.
//!
//! A rolling prefix buffer keeps the last ~300 ms of audio so the first
//! post-silence chunk handed to the ASR can be padded backwards, avoiding
//! clipped word onsets.

use std::collections::VecDeque;

/// Samples per classification window (32 ms at 16 kHz).
pub const WINDOW_SIZE: usize = 512;

const SAMPLE_RATE: u64 = 16_000;
const WINDOW_MS: u64 = WINDOW_SIZE as u64 * 1000 / SAMPLE_RATE;

/// Scores one 512-sample window of normalized audio.
///
/// Implementations keep whatever internal state they need across windows
/// (an ONNX model keeps its hidden state, the energy classifier keeps
/// nothing); `reset` clears it between turns.
pub trait SpeechClassifier: Send {
    /// Speech probability in [0, 1] for one window of f32 samples in [-1, 1].
    fn classify(&mut self, window: &[f32]) -> f32;

    fn reset(&mut self) {}
}

/// RMS-energy speech classifier.
///
/// Maps window RMS linearly onto [0, 1] against a full-speech reference
/// level. With the default reference (-26 dBFS) and the default 0.5
/// threshold, anything quieter than -32 dBFS reads as silence.
pub struct EnergyClassifier {
    reference_rms: f32,
}

impl EnergyClassifier {
    pub fn new() -> Self {
        Self {
            reference_rms: 0.05,
        }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn classify(&mut self, window: &[f32]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = window.iter().map(|&s| s * s).sum();
        let rms = (sum_sq / window.len() as f32).sqrt();
        (rms / self.reference_rms).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Speech when probability is strictly greater than this.
    pub threshold: f32,
    /// Silence duration that ends a turn.
    pub min_silence_ms: u64,
    /// Minimum speech duration for a valid turn.
    pub min_speech_ms: u64,
    /// Rolling pre-speech audio retained for ASR onset padding.
    pub prefix_padding_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_silence_ms: 550,
            min_speech_ms: 250,
            prefix_padding_ms: 300,
        }
    }
}

/// Result of feeding one chunk through the detector.
#[derive(Debug, Clone, Copy)]
pub struct VadUpdate {
    pub is_speech: bool,
    pub turn_complete: bool,
    pub speech_probability: f32,
    pub speech_ms: u64,
    pub silence_ms: u64,
}

pub struct TurnDetector {
    classifier: Box<dyn SpeechClassifier>,
    config: VadConfig,
    /// Carry-over of samples not yet forming a complete window.
    accum: Vec<i16>,
    prefix: VecDeque<Vec<i16>>,
    prefix_max_windows: usize,
    is_speaking: bool,
    last_window_speech: bool,
    speech_ms: u64,
    silence_ms: u64,
}

impl TurnDetector {
    pub fn new(config: VadConfig, classifier: Box<dyn SpeechClassifier>) -> Self {
        let prefix_max_windows = (config.prefix_padding_ms / WINDOW_MS).max(1) as usize;
        Self {
            classifier,
            config,
            accum: Vec::with_capacity(WINDOW_SIZE * 2),
            prefix: VecDeque::with_capacity(prefix_max_windows),
            prefix_max_windows,
            is_speaking: false,
            last_window_speech: false,
            speech_ms: 0,
            silence_ms: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(VadConfig::default(), Box::new(EnergyClassifier::new()))
    }

    /// Feed 16 kHz PCM and advance the turn state machine.
    ///
    /// Classifies every complete 512-sample window buffered so far. With
    /// fewer than 512 samples buffered this reports the last known speech
    /// state and never fabricates a probability. `turn_complete` is sticky
    /// across the windows consumed by this call so a completion cannot be
    /// lost when more than one window's worth of audio arrives at once.
    pub fn process_chunk(&mut self, pcm_16k: &[i16]) -> VadUpdate {
        self.accum.extend_from_slice(pcm_16k);

        if self.accum.len() < WINDOW_SIZE {
            return VadUpdate {
                is_speech: self.last_window_speech,
                turn_complete: false,
                speech_probability: 0.0,
                speech_ms: self.speech_ms,
                silence_ms: self.silence_ms,
            };
        }

        let mut turn_complete = false;
        let mut last_probability = 0.0;

        while self.accum.len() >= WINDOW_SIZE {
            let window: Vec<i16> = self.accum.drain(..WINDOW_SIZE).collect();
            let floats = crate::audio::pcm_to_f32(&window);
            let probability = self.classifier.classify(&floats);
            last_probability = probability;

            self.prefix.push_back(window);
            if self.prefix.len() > self.prefix_max_windows {
                self.prefix.pop_front();
            }

            // Exactly at threshold is not speech.
            let is_speech = probability > self.config.threshold;
            self.last_window_speech = is_speech;

            if is_speech {
                self.speech_ms += WINDOW_MS;
                self.silence_ms = 0;
                self.is_speaking = true;
            } else {
                self.silence_ms += WINDOW_MS;
            }

            if self.is_speaking
                && self.silence_ms >= self.config.min_silence_ms
                && self.speech_ms >= self.config.min_speech_ms
            {
                turn_complete = true;
            }
        }

        VadUpdate {
            is_speech: self.last_window_speech,
            turn_complete,
            speech_probability: last_probability,
            speech_ms: self.speech_ms,
            silence_ms: self.silence_ms,
        }
    }

    /// Audio retained before speech started, oldest first.
    pub fn prefix_audio(&self) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.prefix.len() * WINDOW_SIZE);
        for window in &self.prefix {
            out.extend_from_slice(window);
        }
        out
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Zero all state, including the accumulation and prefix buffers.
    /// Called after a completed turn and on barge-in.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.last_window_speech = false;
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.accum.clear();
        self.prefix.clear();
        self.classifier.reset();
    }
}
