//! Outbound audio sender with backpressure.
//!
//! One `AudioStreamer` per call: a bounded FIFO of base64 μ-law payloads and
//! a background emitter that drains it onto the transport at real-time rate.
//! Producers block in `enqueue` for up to one second when the queue is full,
//! then observe a failure instead of growing memory without bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::telephony::protocol::OutboundFrame;

/// ~1 second of audio at one frame per 20 ms.
pub const QUEUE_CAPACITY: usize = 50;

/// Wire frames carry 20 ms of audio; the emitter paces at this rate so the
/// provider's jitter buffer is never outrun.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("outbound audio queue full after 1s (depth {depth})")]
    Full { depth: usize },
}

struct Shared {
    queue: Mutex<VecDeque<String>>,
    /// Signalled when the emitter frees a slot or the queue is cleared.
    space: Notify,
    /// Signalled when a producer pushes a payload.
    pending: Notify,
    sent: AtomicU64,
    dropped: AtomicU64,
}

pub struct AudioStreamer {
    stream_sid: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl AudioStreamer {
    pub fn new(stream_sid: &str) -> Self {
        Self {
            stream_sid: stream_sid.to_string(),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
                space: Notify::new(),
                pending: Notify::new(),
                sent: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            emitter: Mutex::new(None),
        }
    }

    /// Spawn the background emitter that dequeues payloads and sends them to
    /// the transport writer, one frame per 20 ms of wall clock.
    pub fn start(&self, transport: mpsc::Sender<OutboundFrame>) {
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let stream_sid = self.stream_sid.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(FRAME_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                let payload = loop {
                    let popped = shared.queue.lock().unwrap().pop_front();
                    if let Some(p) = popped {
                        shared.space.notify_one();
                        break p;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(stream_sid = %stream_sid, "audio emitter cancelled");
                            return;
                        }
                        _ = shared.pending.notified() => {}
                    }
                };

                // Pace first: frame k goes out at t0 + k * 20ms.
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let frame = OutboundFrame::media(&stream_sid, payload);
                if transport.send(frame).await.is_err() {
                    warn!(stream_sid = %stream_sid, "transport closed, audio emitter exiting");
                    return;
                }
                shared.sent.fetch_add(1, Ordering::Relaxed);
            }
        });

        *self.emitter.lock().unwrap() = Some(handle);
        info!(stream_sid = %self.stream_sid, "audio streamer started");
    }

    /// Queue one payload, blocking up to one second for space.
    ///
    /// On timeout the payload is dropped and the caller observes
    /// `EnqueueError::Full`; the call itself continues.
    pub async fn enqueue(&self, payload: String) -> Result<(), EnqueueError> {
        let deadline = tokio::time::Instant::now() + ENQUEUE_TIMEOUT;
        let mut payload = Some(payload);

        loop {
            {
                let mut queue = self.shared.queue.lock().unwrap();
                if queue.len() < QUEUE_CAPACITY {
                    queue.push_back(payload.take().expect("payload consumed twice"));
                    drop(queue);
                    self.shared.pending.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, self.shared.space.notified())
                .await
                .is_err()
            {
                let depth = self.depth();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    stream_sid = %self.stream_sid,
                    depth, "outbound queue full, dropping frame"
                );
                return Err(EnqueueError::Full { depth });
            }
        }
    }

    /// Drain everything still queued without emitting it. Used on barge-in.
    pub fn clear(&self) -> usize {
        let drained = {
            let mut queue = self.shared.queue.lock().unwrap();
            let n = queue.len();
            queue.clear();
            n
        };
        // Wake any producers blocked on a full queue.
        self.shared.space.notify_waiters();
        info!(stream_sid = %self.stream_sid, drained, "cleared outbound audio queue");
        drained
    }

    /// Cancel the emitter and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.emitter.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!(stream_sid = %self.stream_sid, "audio streamer stopped");
        }
    }

    pub fn depth(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Frames successfully emitted onto the transport. Monotonic.
    pub fn sent_count(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue stayed full past the timeout.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
