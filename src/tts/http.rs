//! HTTP speech-synthesis backend.
//!
//! Talks to an OpenAI-compatible `/v1/audio/speech` endpoint (Kokoro-style
//! local servers expose this), requests WAV, and re-chunks the decoded PCM
//! so downstream consumers see a stream they can cancel mid-utterance.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Cursor;
use tokio::sync::mpsc;
use tracing::debug;

use crate::tts::{PcmChunk, SpeechSynthesizer, TtsConfig};

/// ~200 ms of audio per chunk at 24 kHz.
const CHUNK_SAMPLES: usize = 4800;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

pub struct HttpTts {
    base_url: String,
    voice: String,
    speed: f32,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice: config.voice.clone(),
            speed: parse_rate(&config.rate),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<PcmChunk>>> {
        let (tx, rx) = mpsc::channel(8);
        if text.trim().is_empty() {
            return Ok(rx);
        }

        debug!("synthesizing {} chars", text.len());

        let request = SpeechRequest {
            model: "kokoro",
            input: text,
            voice: &self.voice,
            response_format: "wav",
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&request)
            .send()
            .await
            .context("failed to reach TTS server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("TTS server error ({status}): {body}"));
        }

        let wav_bytes = response
            .bytes()
            .await
            .context("failed to read TTS response")?;
        let samples = wav_to_pcm(&wav_bytes)?;

        tokio::spawn(async move {
            for chunk in samples.chunks(CHUNK_SAMPLES) {
                if tx.send(Ok(chunk.to_vec())).await.is_err() {
                    // Receiver dropped: synthesis was cancelled.
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// Parse a "+N%" / "-N%" rate string into a speed multiplier.
fn parse_rate(rate: &str) -> f32 {
    let trimmed = rate.trim().trim_end_matches('%');
    match trimmed.parse::<f32>() {
        Ok(pct) => (1.0 + pct / 100.0).clamp(0.5, 2.0),
        Err(_) => 1.0,
    }
}

/// Decode a WAV body into mono i16 samples.
fn wav_to_pcm(wav_bytes: &[u8]) -> Result<Vec<i16>> {
    let reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .context("TTS response is not valid WAV")?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .into_samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode WAV samples")?,
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|f| (f * 32767.0).clamp(-32768.0, 32767.0) as i16))
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode float WAV samples")?,
    };

    if spec.channels <= 1 {
        return Ok(samples);
    }
    // Keep the first channel of multi-channel output.
    Ok(samples
        .chunks(spec.channels as usize)
        .map(|frame| frame[0])
        .collect())
}
