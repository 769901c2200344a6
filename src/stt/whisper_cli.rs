//! faster-whisper subprocess backend.
//!
//! Runs the faster-whisper transcription script as a child process per
//! decode, passing WAV audio as base64 on stdin and reading a JSON result
//! from stdout. Partial transcripts come from re-decoding the accumulated
//! turn audio once per second of new speech; the model itself stays warm
//! inside the script's process cache.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::AsrConfig;
use crate::stt::{AsrSession, SpeechToText};

const SAMPLE_RATE: u32 = 16_000;
/// Re-decode for a partial after this much new audio.
const PARTIAL_INTERVAL_SAMPLES: usize = SAMPLE_RATE as usize;
const DECODE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WhisperCli {
    config: AsrConfig,
}

impl WhisperCli {
    pub fn new(config: &AsrConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl SpeechToText for WhisperCli {
    fn start_session(&self) -> Box<dyn AsrSession> {
        Box::new(WhisperCliSession {
            config: self.config.clone(),
            audio: Vec::new(),
            decoded_through: 0,
        })
    }
}

struct WhisperCliSession {
    config: AsrConfig,
    /// All audio for the current turn, f32 normalized.
    audio: Vec<f32>,
    /// Samples already covered by the last partial decode.
    decoded_through: usize,
}

impl AsrSession for WhisperCliSession {
    fn accept_audio(&mut self, samples: &[f32]) -> Result<Option<String>> {
        self.audio.extend_from_slice(samples);

        if self.audio.len() - self.decoded_through < PARTIAL_INTERVAL_SAMPLES {
            return Ok(None);
        }
        self.decoded_through = self.audio.len();

        let text = run_whisper(&self.config, &self.audio)?;
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    fn finalize(&mut self) -> Result<String> {
        let audio = std::mem::take(&mut self.audio);
        self.decoded_through = 0;
        if audio.is_empty() {
            return Ok(String::new());
        }
        run_whisper(&self.config, &audio)
    }
}

/// One blocking decode: audio → WAV → base64 → script → JSON text.
fn run_whisper(config: &AsrConfig, audio: &[f32]) -> Result<String> {
    debug!(
        "whisper decode: {:.1}s of audio, model={}",
        audio.len() as f64 / f64::from(SAMPLE_RATE),
        config.model
    );

    let wav = pcm_to_wav(audio)?;
    let audio_b64 = BASE64.encode(&wav);

    let mut child = std::process::Command::new("python3")
        .arg(&config.script_path)
        .arg("-")
        .arg(&config.model)
        .arg(&config.language)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("failed to spawn faster-whisper process")?;

    child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("no stdin on whisper process"))?
        .write_all(audio_b64.as_bytes())
        .context("failed to write audio to whisper stdin")?;

    let deadline = Instant::now() + DECODE_TIMEOUT;
    loop {
        match child.try_wait().context("failed to poll whisper process")? {
            Some(status) if !status.success() => {
                return Err(anyhow!("faster-whisper exited with {status}"));
            }
            Some(_) => break,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "transcription timeout ({}s)",
                    DECODE_TIMEOUT.as_secs()
                ));
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }

    let output = child
        .wait_with_output()
        .context("failed to collect whisper output")?;

    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).context("failed to parse transcription result")?;

    if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
        if !error.is_empty() {
            return Err(anyhow!("transcription error: {error}"));
        }
    }

    Ok(result
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string())
}

/// Build an in-memory 16 kHz mono WAV from normalized samples.
fn pcm_to_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).context("failed to create WAV writer")?;
    for &sample in samples {
        writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_and_length() {
        let wav = pcm_to_wav(&vec![0.0f32; 16_000]).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        // 44-byte header + 16000 i16 samples
        assert_eq!(wav.len(), 44 + 32_000);
    }

    #[test]
    fn session_waits_for_enough_audio_before_partial_decode() {
        let config = AsrConfig {
            model: "tiny".into(),
            language: "en".into(),
            script_path: "/nonexistent".into(),
        };
        let mut session = WhisperCliSession {
            config,
            audio: Vec::new(),
            decoded_through: 0,
        };
        // Under a second of audio: no decode attempted, no subprocess spawned.
        assert!(session.accept_audio(&vec![0.0; 8000]).unwrap().is_none());
    }

    #[test]
    fn finalize_on_empty_turn_is_empty() {
        let config = AsrConfig {
            model: "tiny".into(),
            language: "en".into(),
            script_path: "/nonexistent".into(),
        };
        let mut session = WhisperCliSession {
            config,
            audio: Vec::new(),
            decoded_through: 0,
        };
        assert_eq!(session.finalize().unwrap(), "");
    }
}
