//! End-to-end call scenarios driven through a `CallSession` with scripted
//! ASR/LLM/TTS engines and an in-memory transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use voice_gateway::audio::codec::pcm_to_mulaw;
use voice_gateway::llm::conversation::{Role, INTERRUPTED_MARKER};
use voice_gateway::llm::{ChatMessage, LanguageModel};
use voice_gateway::session::{CallSession, Gateway, SessionControl, FILLER_UTTERANCE};
use voice_gateway::stt::{AsrSession, SpeechToText};
use voice_gateway::telephony::protocol::{OutboundFrame, StreamEvent};
use voice_gateway::tts::{PcmChunk, SpeechSynthesizer};
use voice_gateway::Config;

// ── Scripted engines ─────────────────────────────────────────

/// ASR that transcribes any non-empty turn to the next scripted line.
struct ScriptedAsr {
    finals: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedAsr {
    fn new(finals: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            finals: Arc::new(Mutex::new(finals.iter().map(|s| s.to_string()).collect())),
        })
    }
}

impl SpeechToText for ScriptedAsr {
    fn start_session(&self) -> Box<dyn AsrSession> {
        Box::new(ScriptedAsrSession {
            finals: self.finals.clone(),
            samples: 0,
        })
    }
}

struct ScriptedAsrSession {
    finals: Arc<Mutex<VecDeque<String>>>,
    samples: usize,
}

impl AsrSession for ScriptedAsrSession {
    fn accept_audio(&mut self, samples: &[f32]) -> Result<Option<String>> {
        self.samples += samples.len();
        // One partial per second of audio, like a streaming decoder.
        if self.samples % 16_000 < samples.len() {
            return Ok(Some("...".to_string()));
        }
        Ok(None)
    }

    fn finalize(&mut self) -> Result<String> {
        let heard = std::mem::take(&mut self.samples) > 0;
        if !heard {
            return Ok(String::new());
        }
        Ok(self.finals.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// LLM that streams scripted tokens, optionally pausing between them.
struct ScriptedLlm {
    tokens: Vec<String>,
    token_delay: Duration,
    fail: bool,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    fn streaming(tokens: &[&str], token_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            token_delay,
            fail: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            tokens: Vec::new(),
            token_delay: Duration::ZERO,
            fail: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        self.requests.lock().unwrap().push(messages);
        if self.fail {
            return Err(anyhow!("model endpoint unreachable"));
        }

        let (tx, rx) = mpsc::channel(4);
        let tokens = self.tokens.clone();
        let delay = self.token_delay;
        tokio::spawn(async move {
            for token in tokens {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// TTS that emits a fixed amount of PCM per sentence and records requests.
struct ScriptedTts {
    requests: Mutex<Vec<String>>,
}

impl ScriptedTts {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }

    fn spoken(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedTts {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<PcmChunk>>> {
        self.requests.lock().unwrap().push(text.to_string());
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            // Three 20ms wire frames per sentence (480 samples at 24kHz each).
            for _ in 0..3 {
                if tx.send(Ok(vec![2000i16; 480])).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

// ── Harness ──────────────────────────────────────────────────

struct Harness {
    session: CallSession,
    frames: mpsc::Receiver<OutboundFrame>,
}

fn harness(asr: Arc<ScriptedAsr>, llm: Arc<ScriptedLlm>, tts: Arc<ScriptedTts>) -> Harness {
    let gateway = Gateway::with_engines(Config::default(), asr, llm, tts);
    let (tx, rx) = mpsc::channel(1024);
    Harness {
        session: CallSession::new(gateway, tx),
        frames: rx,
    }
}

fn frame(json: &str) -> StreamEvent {
    serde_json::from_str(json).unwrap()
}

fn start_frame() -> StreamEvent {
    frame(
        r#"{"event":"start","streamSid":"MZ1","start":{"callSid":"CA1",
            "mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}}}"#,
    )
}

fn stop_frame() -> StreamEvent {
    frame(r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1","streamSid":"MZ1"}}"#)
}

/// One 20ms media frame of a 440 Hz tone at roughly -3 dBFS.
fn tone_payload(phase: &mut f32) -> String {
    let mut pcm = Vec::with_capacity(160);
    for _ in 0..160 {
        pcm.push((phase.sin() * 23_000.0) as i16);
        *phase += 440.0 * std::f32::consts::TAU / 8000.0;
    }
    BASE64.encode(pcm_to_mulaw(&pcm))
}

fn silence_payload() -> String {
    BASE64.encode(pcm_to_mulaw(&[0i16; 160]))
}

fn media_frame(payload: &str) -> StreamEvent {
    frame(&format!(
        r#"{{"event":"media","streamSid":"MZ1","media":{{"payload":"{payload}"}}}}"#
    ))
}

async fn feed_speech(session: &mut CallSession, frames: usize, phase: &mut f32) {
    for _ in 0..frames {
        session.handle_frame(media_frame(&tone_payload(phase))).await;
    }
}

async fn feed_silence(session: &mut CallSession, frames: usize) {
    for _ in 0..frames {
        session.handle_frame(media_frame(&silence_payload())).await;
    }
}

/// Speak for ~1s then go quiet long enough to complete the turn.
async fn feed_turn(session: &mut CallSession, phase: &mut f32) {
    feed_speech(session, 50, phase).await;
    feed_silence(session, 35).await;
}

async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never settled");
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn single_clean_turn() {
    let asr = ScriptedAsr::new(&["what's the weather like"]);
    let llm = ScriptedLlm::streaming(&["It's ", "sunny ", "today."], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts.clone());

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;
    feed_turn(&mut h.session, &mut phase).await;

    let conversation = h.session.conversation();
    settle(|| !h.session.response_in_flight() && !h.session.is_responding()).await;

    let messages = conversation.lock().unwrap().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "what's the weather like");
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "It's sunny today.");
    assert!(!messages[2].content.contains(INTERRUPTED_MARKER));
    assert_eq!(conversation.lock().unwrap().turn_count(), 1);

    assert_eq!(tts.spoken(), vec!["It's sunny today."]);

    // The emitter delivered at least one media frame.
    let audio = h.session.outbound_audio().unwrap();
    settle(|| audio.sent_count() >= 1).await;
    let frame = h.frames.recv().await.unwrap();
    assert!(matches!(frame, OutboundFrame::Media { .. }));
}

#[tokio::test(start_paused = true)]
async fn llm_request_includes_system_and_history() {
    let asr = ScriptedAsr::new(&["hello there"]);
    let llm = ScriptedLlm::streaming(&["Hi."], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm.clone(), tts);

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;
    feed_turn(&mut h.session, &mut phase).await;
    settle(|| !h.session.response_in_flight()).await;

    let requests = llm.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0].role, Role::System);
    assert_eq!(requests[0][1].content, "hello there");
}

#[tokio::test(start_paused = true)]
async fn barge_in_cancels_response_and_clears_audio() {
    let asr = ScriptedAsr::new(&["tell me a long story", "actually stop"]);
    // First sentence completes quickly; afterwards the model keeps
    // trickling tokens that never finish another sentence, leaving the
    // response in flight for the caller to interrupt.
    let mut tokens = vec!["Once upon a time."];
    let filler_tokens: Vec<String> = (0..60).map(|i| format!(" word{i}")).collect();
    tokens.extend(filler_tokens.iter().map(|s| s.as_str()));
    let llm = ScriptedLlm::streaming(&tokens, Duration::from_millis(500));
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts);

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;
    feed_turn(&mut h.session, &mut phase).await;

    // Wait for the response to start and its first frame to be emitted.
    settle(|| h.session.is_responding()).await;
    let audio = h.session.outbound_audio().unwrap();
    settle(|| audio.sent_count() >= 1).await;

    // Caller starts talking over the agent.
    feed_speech(&mut h.session, 5, &mut phase).await;

    // The interrupt procedure ran: response cancelled, queue purged.
    assert!(!h.session.is_responding());
    assert!(!h.session.response_in_flight());
    assert_eq!(audio.depth(), 0);

    // The history records only what was queued, marked interrupted.
    let conversation = h.session.conversation();
    let messages = conversation.lock().unwrap().messages();
    let last = messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(
        last.content,
        format!("Once upon a time. {INTERRUPTED_MARKER}")
    );

    // A clear frame went out to the provider.
    let mut saw_clear = false;
    while let Ok(frame) = h.frames.try_recv() {
        if matches!(frame, OutboundFrame::Clear { ref stream_sid } if stream_sid == "MZ1") {
            saw_clear = true;
        }
    }
    assert!(saw_clear, "expected a clear frame after barge-in");
}

#[tokio::test(start_paused = true)]
async fn llm_failure_speaks_filler_and_records_nothing() {
    let asr = ScriptedAsr::new(&["hello"]);
    let llm = ScriptedLlm::failing();
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts.clone());

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;
    feed_turn(&mut h.session, &mut phase).await;
    settle(|| !h.session.response_in_flight()).await;

    // The caller hears the filler, but no assistant message is recorded.
    assert_eq!(tts.spoken(), vec![FILLER_UTTERANCE.to_string()]);
    let conversation = h.session.conversation();
    let messages = conversation.lock().unwrap().messages();
    assert_eq!(messages.len(), 2); // system + user only
    assert_eq!(messages[1].role, Role::User);

    let audio = h.session.outbound_audio().unwrap();
    settle(|| audio.sent_count() >= 1).await;
}

#[tokio::test(start_paused = true)]
async fn empty_transcript_spawns_no_response() {
    // The ASR yields an empty final: VAD heard sound, whisper heard nothing.
    let asr = ScriptedAsr::new(&[""]);
    let llm = ScriptedLlm::streaming(&["never"], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm.clone(), tts);

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;
    feed_turn(&mut h.session, &mut phase).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!h.session.response_in_flight());
    assert_eq!(llm.request_count(), 0);
    assert_eq!(h.session.conversation().lock().unwrap().turn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn two_turns_accumulate_history() {
    let asr = ScriptedAsr::new(&["first question", "second question"]);
    let llm = ScriptedLlm::streaming(&["Answer."], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts);

    h.session.handle_frame(start_frame()).await;
    let mut phase = 0.0;

    feed_turn(&mut h.session, &mut phase).await;
    settle(|| !h.session.response_in_flight()).await;
    feed_turn(&mut h.session, &mut phase).await;
    settle(|| !h.session.response_in_flight()).await;

    let conversation = h.session.conversation();
    assert_eq!(conversation.lock().unwrap().turn_count(), 2);
    // system + (user, assistant) x 2
    assert_eq!(conversation.lock().unwrap().messages().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn stop_frame_ends_and_cleanup_is_idempotent() {
    let asr = ScriptedAsr::new(&[]);
    let llm = ScriptedLlm::streaming(&[], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts);

    h.session.handle_frame(start_frame()).await;
    let control = h.session.handle_frame(stop_frame()).await;
    assert_eq!(control, SessionControl::End);

    // A second cleanup must be harmless.
    h.session.shutdown().await;
    assert!(h.session.outbound_audio().is_none());
}

#[tokio::test(start_paused = true)]
async fn media_before_start_is_dropped() {
    let asr = ScriptedAsr::new(&[]);
    let llm = ScriptedLlm::streaming(&[], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts);

    let mut phase = 0.0;
    // No start frame: frames are dropped without crashing the session.
    feed_speech(&mut h.session, 3, &mut phase).await;
    assert_eq!(h.session.audio_received_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_skipped() {
    let asr = ScriptedAsr::new(&[]);
    let llm = ScriptedLlm::streaming(&[], Duration::ZERO);
    let tts = ScriptedTts::new();
    let mut h = harness(asr, llm, tts);

    assert_eq!(
        h.session.handle_text("{not json").await,
        SessionControl::Continue
    );
    assert_eq!(
        h.session.handle_text(r#"{"event":"mystery"}"#).await,
        SessionControl::Continue
    );

    h.session.handle_frame(start_frame()).await;
    // Invalid base64 payload: logged and skipped.
    h.session
        .handle_frame(media_frame("!!!not-base64!!!"))
        .await;
    assert_eq!(h.session.audio_received_count(), 0);
}
