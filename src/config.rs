//! Environment configuration.
//!
//! The process is stateless: everything it needs arrives through the
//! environment (optionally via a `.env` file). Unset keys fall back to
//! defaults; only the telephony credentials are required.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

use crate::tts::TtsConfig;
use crate::vad::VadConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub asr: AsrConfig,
    pub vad: VadConfig,
    /// Admission limit: new sessions beyond this are refused.
    pub max_concurrent_calls: usize,
    /// Overrides the built-in phone persona when set.
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct AsrConfig {
    /// Whisper model size (tiny, base, small, distil-large-v3, ...).
    pub model: String,
    pub language: String,
    /// Path to the faster-whisper transcription script.
    pub script_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            telephony: TelephonyConfig {
                account_sid: String::new(),
                auth_token: String::new(),
                phone_number: String::new(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:8001/v1".to_string(),
                api_key: "unused".to_string(),
                model: "meta-llama/llama-3.1-8b-instruct".to_string(),
                max_tokens: 256,
                temperature: 0.7,
            },
            tts: TtsConfig::default(),
            asr: AsrConfig {
                model: "distil-large-v3".to_string(),
                language: "en".to_string(),
                script_path: "/usr/local/bin/faster-whisper-server.py".to_string(),
            },
            vad: VadConfig::default(),
            max_concurrent_calls: 10,
            system_prompt: None,
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if
    /// present. Telephony credentials are required; everything else has a
    /// default.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", &defaults.server.host),
                port: env_parse("SERVER_PORT", defaults.server.port)?,
            },
            telephony: TelephonyConfig {
                account_sid: env::var("TWILIO_ACCOUNT_SID")
                    .context("TWILIO_ACCOUNT_SID is not set")?,
                auth_token: env::var("TWILIO_AUTH_TOKEN")
                    .context("TWILIO_AUTH_TOKEN is not set")?,
                phone_number: env::var("TWILIO_PHONE_NUMBER")
                    .context("TWILIO_PHONE_NUMBER is not set")?,
            },
            llm: LlmConfig {
                base_url: env_or("LLM_BASE_URL", &defaults.llm.base_url),
                api_key: env_or("LLM_API_KEY", &defaults.llm.api_key),
                model: env_or("LLM_MODEL", &defaults.llm.model),
                max_tokens: env_parse("LLM_MAX_TOKENS", defaults.llm.max_tokens)?,
                temperature: env_parse("LLM_TEMPERATURE", defaults.llm.temperature)?,
            },
            tts: TtsConfig {
                engine: env_or("TTS_ENGINE", &defaults.tts.engine),
                voice: env_or("TTS_VOICE", &defaults.tts.voice),
                rate: env_or("TTS_RATE", &defaults.tts.rate),
                base_url: env_or("TTS_BASE_URL", &defaults.tts.base_url),
                sample_rate: defaults.tts.sample_rate,
            },
            asr: AsrConfig {
                model: env_or("ASR_MODEL", &defaults.asr.model),
                language: env_or("ASR_LANGUAGE", &defaults.asr.language),
                script_path: env_or("ASR_SCRIPT_PATH", &defaults.asr.script_path),
            },
            vad: VadConfig {
                threshold: env_parse("VAD_THRESHOLD", defaults.vad.threshold)?,
                min_silence_ms: env_parse("VAD_MIN_SILENCE_MS", defaults.vad.min_silence_ms)?,
                min_speech_ms: env_parse("VAD_MIN_SPEECH_MS", defaults.vad.min_speech_ms)?,
                prefix_padding_ms: defaults.vad.prefix_padding_ms,
            },
            max_concurrent_calls: env_parse("MAX_CONCURRENT_CALLS", defaults.max_concurrent_calls)?,
            system_prompt: env::var("SYSTEM_PROMPT").ok(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.max_concurrent_calls, 10);
        assert_eq!(config.vad.min_silence_ms, 550);
        assert_eq!(config.tts.sample_rate, 24_000);
    }

    #[test]
    fn env_or_falls_back() {
        assert_eq!(env_or("VG_TEST_DEFINITELY_UNSET", "fallback"), "fallback");
    }

    #[test]
    fn env_parse_uses_default_when_unset() {
        let value: u16 = env_parse("VG_TEST_DEFINITELY_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }
}
