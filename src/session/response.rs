//! The response task: one cancellable pipeline per agent utterance.
//!
//! Commits the user transcript, streams LLM tokens, synthesizes each
//! completed sentence, and pushes 20 ms wire frames onto the outbound
//! queue. Cancellation (barge-in or session teardown) can land at any
//! suspension point; the task then records only the prefix of the reply
//! whose audio was fully queued, marked `[interrupted]`, and returns
//! normally — cancellation is an ordinary path here, not an error.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audio::AudioStreamer;
use crate::llm::conversation::Conversation;
use crate::llm::LanguageModel;
use crate::metrics::Metrics;
use crate::tts::{PayloadFramer, Sentence, SentenceChunker, SpeechSynthesizer};

/// Spoken when the language model fails before producing any token, so the
/// caller hears something instead of dead air. Never recorded in history.
pub const FILLER_UTTERANCE: &str =
    "I'm sorry, I'm having a little trouble right now. Could you say that again?";

/// Everything one response needs, cloned out of the session.
pub struct ResponseContext {
    pub stream_sid: String,
    pub conversation: Arc<Mutex<Conversation>>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub audio: Arc<AudioStreamer>,
    pub is_responding: Arc<AtomicBool>,
    pub metrics: Arc<Metrics>,
}

pub struct ResponseHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResponseHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to observe cancellation (or finish) and run its
    /// cleanup — including the partial-message commit.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("response task panicked: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Reply accumulation while the task runs. `spoken` is the byte prefix of
/// `text` whose audio has been fully queued on the outbound sender.
#[derive(Default)]
struct ReplyProgress {
    text: String,
    spoken: usize,
}

/// Spawn the response pipeline for one user turn.
pub fn spawn(ctx: ResponseContext, user_text: String) -> ResponseHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(run(ctx, user_text, token));
    ResponseHandle { cancel, task }
}

async fn run(ctx: ResponseContext, user_text: String, cancel: CancellationToken) {
    ctx.is_responding.store(true, Ordering::SeqCst);

    let mut reply = ReplyProgress::default();
    let interrupted = tokio::select! {
        _ = cancel.cancelled() => true,
        result = drive(&ctx, &user_text, &mut reply) => {
            if let Err(e) = result {
                error!(stream_sid = %ctx.stream_sid, "response pipeline error: {e}");
                ctx.metrics.record_error();
            }
            false
        }
    };

    if interrupted {
        let spoken = reply.text.get(..reply.spoken).unwrap_or("").to_string();
        info!(
            stream_sid = %ctx.stream_sid,
            generated = reply.text.len(),
            spoken = spoken.len(),
            "response cancelled mid-flight"
        );
        if !spoken.trim().is_empty() {
            ctx.conversation
                .lock()
                .unwrap()
                .add_assistant_partial(&spoken);
        }
    }

    ctx.is_responding.store(false, Ordering::SeqCst);
}

async fn drive(ctx: &ResponseContext, user_text: &str, reply: &mut ReplyProgress) -> Result<()> {
    // The user turn is committed before the first token is requested.
    let messages = {
        let mut conversation = ctx.conversation.lock().unwrap();
        conversation.add_user(user_text);
        conversation.messages()
    };

    let mut tokens = match ctx.llm.stream_chat(messages).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(stream_sid = %ctx.stream_sid, "LLM request failed, speaking filler: {e}");
            ctx.metrics.record_error();
            synthesize_to_queue(ctx, FILLER_UTTERANCE).await;
            return Ok(());
        }
    };

    let mut chunker = SentenceChunker::new();
    let mut got_token = false;

    loop {
        match tokens.recv().await {
            Some(Ok(token)) => {
                got_token = true;
                reply.text.push_str(&token);
                for sentence in chunker.push(&token) {
                    speak_sentence(ctx, &sentence, reply).await;
                }
            }
            Some(Err(e)) => {
                ctx.metrics.record_error();
                if !got_token {
                    warn!(stream_sid = %ctx.stream_sid, "LLM stream failed before any token: {e}");
                    synthesize_to_queue(ctx, FILLER_UTTERANCE).await;
                    return Ok(());
                }
                // Tokens were delivered; treat the break as end-of-stream.
                warn!(stream_sid = %ctx.stream_sid, "LLM stream ended early: {e}");
                break;
            }
            None => break,
        }
    }

    if let Some(sentence) = chunker.flush() {
        speak_sentence(ctx, &sentence, reply).await;
    }

    if !reply.text.trim().is_empty() {
        let mut conversation = ctx.conversation.lock().unwrap();
        conversation.add_assistant(&reply.text);
        info!(
            stream_sid = %ctx.stream_sid,
            turn = conversation.turn_count(),
            chars = reply.text.len(),
            "response complete"
        );
    }
    Ok(())
}

/// Synthesize one sentence and queue its frames, then advance the spoken
/// index past it. A failed sentence is dropped without advancing: its audio
/// was never fully queued, so it must never be claimed as spoken.
async fn speak_sentence(ctx: &ResponseContext, sentence: &Sentence, reply: &mut ReplyProgress) {
    if sentence.text.is_empty() || synthesize_to_queue(ctx, &sentence.text).await {
        reply.spoken = sentence.end;
    }
}

/// Run text through TTS and enqueue every resulting frame. Returns whether
/// the whole utterance made it onto the queue path; frames dropped by
/// backpressure are logged and counted but do not fail the utterance.
async fn synthesize_to_queue(ctx: &ResponseContext, text: &str) -> bool {
    let mut pcm = match ctx.tts.synthesize(text).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(stream_sid = %ctx.stream_sid, "TTS failed, dropping sentence: {e}");
            ctx.metrics.record_error();
            return false;
        }
    };

    let mut framer = PayloadFramer::new();
    while let Some(chunk) = pcm.recv().await {
        match chunk {
            Ok(samples) => {
                for payload in framer.push(&samples) {
                    if ctx.audio.enqueue(payload).await.is_err() {
                        ctx.metrics.record_error();
                    }
                }
            }
            Err(e) => {
                warn!(stream_sid = %ctx.stream_sid, "TTS stream error mid-sentence: {e}");
                ctx.metrics.record_error();
                return false;
            }
        }
    }

    if let Some(payload) = framer.flush() {
        if ctx.audio.enqueue(payload).await.is_err() {
            ctx.metrics.record_error();
        }
    }
    true
}
