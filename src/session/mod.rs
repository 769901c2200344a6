//! Per-call orchestration.
//!
//! A [`CallSession`] owns everything belonging to one call — turn detector,
//! transcription feeder, conversation, outbound audio, and the in-flight
//! response task — and routes the provider's protocol frames through them.
//! Shared, process-wide pieces (models, registry, metrics, config) come in
//! through [`Gateway`] at construction; nothing per-call outlives the
//! session's cleanup.

pub mod registry;
pub mod response;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::codec::mulaw_to_pcm;
use crate::audio::resample::upsample_8k_to_16k;
use crate::audio::AudioStreamer;
use crate::config::Config;
use crate::llm::conversation::Conversation;
use crate::llm::{LanguageModel, LlmClient};
use crate::metrics::Metrics;
use crate::stt::{SpeechToText, TranscriptionFeeder, WhisperCli};
use crate::telephony::protocol::{OutboundFrame, StartMeta, StopMeta, StreamEvent};
use crate::tts::{HttpTts, SpeechSynthesizer};
use crate::vad::{EnergyClassifier, TurnDetector, VadUpdate};

pub use registry::{CallContext, CallRegistry, CallState};
pub use response::{ResponseContext, ResponseHandle, FILLER_UTTERANCE};

/// Process-wide state: shared model handles, the call registry, metrics,
/// and configuration. One per process, cloned into every session.
#[derive(Clone)]
pub struct Gateway {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub registry: Arc<CallRegistry>,
    pub asr: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

impl Gateway {
    /// Build with the production engines. Constructing the clients here,
    /// before the listener binds, is what pre-warms them.
    pub fn new(config: Config) -> Self {
        let asr: Arc<dyn SpeechToText> = Arc::new(WhisperCli::new(&config.asr));
        let llm: Arc<dyn LanguageModel> = Arc::new(LlmClient::new(&config.llm));
        let tts: Arc<dyn SpeechSynthesizer> = match config.tts.engine.as_str() {
            "http" => Arc::new(HttpTts::new(&config.tts)),
            other => {
                warn!("unknown TTS engine {other:?}, falling back to http");
                Arc::new(HttpTts::new(&config.tts))
            }
        };
        Self::with_engines(config, asr, llm, tts)
    }

    /// Build with explicit engines (tests use scripted ones).
    pub fn with_engines(
        config: Config,
        asr: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        let max_calls = config.max_concurrent_calls;
        Self {
            config: Arc::new(config),
            metrics: Arc::new(Metrics::new()),
            registry: Arc::new(CallRegistry::new(max_calls)),
            asr,
            llm,
            tts,
        }
    }
}

/// Whether the frame loop should keep running after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    End,
}

pub struct CallSession {
    gateway: Gateway,
    transport: mpsc::Sender<OutboundFrame>,

    /// Registry handle for the connection until `start` names the call.
    pending_id: u64,
    call_sid: Option<String>,
    stream_sid: Option<String>,
    connected_at: Option<Instant>,

    vad: TurnDetector,
    feeder: Option<TranscriptionFeeder>,
    conversation: Arc<Mutex<Conversation>>,
    audio: Option<Arc<AudioStreamer>>,

    is_responding: Arc<AtomicBool>,
    response: Option<ResponseHandle>,
    /// Armed while a barge-in is being handled, so the interrupt procedure
    /// runs exactly once per response.
    interrupting: bool,
    /// Whether this turn's first speech chunk (with prefix padding) has
    /// already been handed to the ASR.
    fed_speech_this_turn: bool,

    audio_received: u64,
    cleaned_up: bool,
}

impl CallSession {
    pub fn new(gateway: Gateway, transport: mpsc::Sender<OutboundFrame>) -> Self {
        let vad = TurnDetector::new(gateway.config.vad, Box::new(EnergyClassifier::new()));
        let conversation = Arc::new(Mutex::new(Conversation::new(
            gateway.config.system_prompt.as_deref(),
        )));
        let pending_id = gateway.registry.on_connected();
        Self {
            gateway,
            transport,
            pending_id,
            call_sid: None,
            stream_sid: None,
            connected_at: None,
            vad,
            feeder: None,
            conversation,
            audio: None,
            is_responding: Arc::new(AtomicBool::new(false)),
            response: None,
            interrupting: false,
            fed_speech_this_turn: false,
            audio_received: 0,
            cleaned_up: false,
        }
    }

    /// Parse and route one raw text frame from the transport. Malformed
    /// JSON and unknown events are logged and skipped.
    pub async fn handle_text(&mut self, raw: &str) -> SessionControl {
        match serde_json::from_str::<StreamEvent>(raw) {
            Ok(event) => self.handle_frame(event).await,
            Err(e) => {
                warn!("unrecognized protocol frame: {e}");
                SessionControl::Continue
            }
        }
    }

    pub async fn handle_frame(&mut self, event: StreamEvent) -> SessionControl {
        match event {
            StreamEvent::Connected { protocol } => {
                debug!(?protocol, "provider connected");
                SessionControl::Continue
            }
            StreamEvent::Start { stream_sid, start } => {
                self.on_start(&stream_sid, start);
                SessionControl::Continue
            }
            StreamEvent::Media { media, .. } => {
                self.on_media(&media.payload).await;
                SessionControl::Continue
            }
            StreamEvent::Mark { .. } => {
                debug!("mark received");
                SessionControl::Continue
            }
            StreamEvent::Dtmf { .. } => {
                debug!("dtmf received");
                SessionControl::Continue
            }
            StreamEvent::Stop { stop, .. } => {
                self.on_stop(stop).await;
                SessionControl::End
            }
        }
    }

    fn on_start(&mut self, stream_sid: &str, start: StartMeta) {
        if self.stream_sid.is_some() {
            error!(stream_sid, "duplicate start frame for this session, ignoring");
            return;
        }

        info!(
            call_sid = %start.call_sid,
            stream_sid,
            "media stream started"
        );
        if let Some(format) = &start.media_format {
            debug!(?format, "media format");
        }

        self.gateway
            .registry
            .on_start(self.pending_id, &start.call_sid, stream_sid);
        self.gateway.metrics.record_call_started();

        self.feeder = Some(TranscriptionFeeder::new(&self.gateway.asr, stream_sid));
        let audio = Arc::new(AudioStreamer::new(stream_sid));
        audio.start(self.transport.clone());
        self.audio = Some(audio);

        self.call_sid = Some(start.call_sid);
        self.stream_sid = Some(stream_sid.to_string());
        self.connected_at = Some(Instant::now());
    }

    async fn on_media(&mut self, payload: &str) {
        if self.stream_sid.is_none() {
            warn!("media frame before start, dropping");
            return;
        }

        let mulaw = match BASE64.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("bad media payload, skipping frame: {e}");
                self.gateway.metrics.record_error();
                return;
            }
        };
        let pcm_8k = mulaw_to_pcm(&mulaw);
        let pcm_16k = upsample_8k_to_16k(&pcm_8k);
        self.audio_received += 1;

        let update = self.vad.process_chunk(&pcm_16k);

        // Barge-in: the caller is speaking over an active response.
        if update.is_speech && self.is_responding.load(Ordering::SeqCst) && !self.interrupting {
            self.interrupting = true;
            self.handle_barge_in().await;
        }

        if update.is_speech {
            let first_of_turn = !self.fed_speech_this_turn;
            self.fed_speech_this_turn = true;
            // The first post-silence chunk is widened to the prefix buffer
            // so word onsets are not clipped.
            let chunk = if first_of_turn {
                let prefix = self.vad.prefix_audio();
                if prefix.is_empty() {
                    pcm_16k
                } else {
                    prefix
                }
            } else {
                pcm_16k
            };

            if let Some(feeder) = &self.feeder {
                if let Err(e) = feeder.push(chunk).await {
                    warn!("ASR error, continuing: {e}");
                    self.gateway.metrics.record_error();
                }
            }
        }

        if update.turn_complete {
            self.on_turn_complete(update).await;
        }
    }

    async fn on_turn_complete(&mut self, update: VadUpdate) {
        info!(
            silence_ms = update.silence_ms,
            speech_ms = update.speech_ms,
            "turn complete"
        );

        let final_text = match &self.feeder {
            Some(feeder) => match feeder.finalize_turn().await {
                Ok(text) => text,
                Err(e) => {
                    warn!("ASR finalize failed, treating turn as empty: {e}");
                    self.gateway.metrics.record_error();
                    String::new()
                }
            },
            None => String::new(),
        };

        if !final_text.trim().is_empty() {
            if self.response.as_ref().is_some_and(|h| !h.is_finished()) {
                // Supervisor invariant: one response task per call.
                error!("response task still active at turn completion, skipping turn");
            } else if let Some(audio) = self.audio.clone() {
                let ctx = ResponseContext {
                    stream_sid: self.stream_sid.clone().unwrap_or_default(),
                    conversation: self.conversation.clone(),
                    llm: self.gateway.llm.clone(),
                    tts: self.gateway.tts.clone(),
                    audio,
                    is_responding: self.is_responding.clone(),
                    metrics: self.gateway.metrics.clone(),
                };
                self.response = Some(response::spawn(ctx, final_text));
            }
        }

        self.vad.reset();
        self.fed_speech_this_turn = false;
    }

    /// The interrupt procedure. Best-effort throughout: a step that fails
    /// is logged and the rest still runs.
    async fn handle_barge_in(&mut self) {
        let stream_sid = self.stream_sid.clone().unwrap_or_default();
        info!(stream_sid = %stream_sid, "barge-in: caller speaking over response");

        // 1. Cancel the response and wait for it to commit its partial.
        if let Some(handle) = self.response.take() {
            handle.cancel();
            handle.wait().await;
        }

        // 2. Purge audio we queued but did not send.
        if let Some(audio) = &self.audio {
            audio.clear();
        }

        // 3. Ask the provider to drop what it already buffered.
        if self
            .transport
            .send(OutboundFrame::clear(&stream_sid))
            .await
            .is_err()
        {
            warn!(stream_sid = %stream_sid, "could not send clear frame, transport closed");
        }

        // 4./5. Re-arm for the next response and start a fresh turn.
        self.interrupting = false;
        self.is_responding.store(false, Ordering::SeqCst);
        self.vad.reset();
        self.fed_speech_this_turn = false;
    }

    async fn on_stop(&mut self, stop: StopMeta) {
        let call_sid = stop.call_sid.or_else(|| self.call_sid.clone());
        if let Some(call_sid) = &call_sid {
            self.gateway.registry.on_stop(call_sid);
        }
        self.shutdown().await;
    }

    /// Mark the call failed in the registry (transport errors).
    pub fn mark_error(&self, message: &str) {
        if let Some(call_sid) = &self.call_sid {
            self.gateway.registry.on_error(call_sid, message);
        }
        self.gateway.metrics.record_error();
    }

    /// Tear down everything this session owns. Safe to call more than once
    /// and on sessions that never saw a `start` frame.
    pub async fn shutdown(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if let Some(handle) = self.response.take() {
            handle.cancel();
            handle.wait().await;
        }

        let mut audio_sent = 0;
        if let Some(audio) = self.audio.take() {
            audio.stop().await;
            audio_sent = audio.sent_count();
        }
        self.feeder = None;
        self.vad.reset();

        match self.call_sid.take() {
            Some(call_sid) => {
                self.gateway
                    .registry
                    .cleanup(&call_sid, self.audio_received, audio_sent);
                self.gateway
                    .metrics
                    .record_call_finished(self.connected_at.map(|t| t.elapsed()));
            }
            // Connection closed before a start frame ever arrived.
            None => self.gateway.registry.drop_pending(self.pending_id),
        }
        self.stream_sid = None;
        debug!("session cleaned up");
    }

    // Accessors used by the server layer and integration tests.

    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        self.conversation.clone()
    }

    pub fn outbound_audio(&self) -> Option<Arc<AudioStreamer>> {
        self.audio.clone()
    }

    pub fn is_responding(&self) -> bool {
        self.is_responding.load(Ordering::SeqCst)
    }

    pub fn response_in_flight(&self) -> bool {
        self.response.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn audio_received_count(&self) -> u64 {
        self.audio_received
    }
}
