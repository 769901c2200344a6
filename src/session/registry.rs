//! Call lifecycle registry and admission control.
//!
//! Tracks one [`CallContext`] per call through
//! connecting → active → stopping (or error), counts admission slots so the
//! process never exceeds its concurrent-call limit, and exposes the drain
//! signal graceful shutdown waits on. Admission slots are released only
//! after a session's cleanup has fully run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    Active,
    Stopping,
    Error,
}

#[derive(Debug, Clone)]
pub struct CallContext {
    pub state: CallState,
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub audio_received: u64,
    pub audio_sent: u64,
    pub error_message: Option<String>,
}

pub struct CallRegistry {
    max_concurrent: usize,
    admitted: AtomicUsize,
    /// Connections that have not yet seen a `start` frame, by pending id.
    pending: Mutex<HashMap<u64, CallContext>>,
    next_pending: AtomicU64,
    calls: Mutex<HashMap<String, CallContext>>,
    draining: AtomicBool,
    drain_started: Notify,
    idle: Notify,
}

impl CallRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            admitted: AtomicUsize::new(0),
            pending: Mutex::new(HashMap::new()),
            next_pending: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            drain_started: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Claim an admission slot. Fails when the process is at its concurrent
    /// call limit or draining for shutdown; the caller must refuse the
    /// connection before processing any protocol frame.
    pub fn try_admit(&self) -> bool {
        if self.draining.load(Ordering::SeqCst) {
            return false;
        }
        let mut current = self.admitted.load(Ordering::SeqCst);
        loop {
            if current >= self.max_concurrent {
                return false;
            }
            match self.admitted.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(now) => current = now,
            }
        }
    }

    /// Give back an admission slot after full session cleanup.
    pub fn release(&self) {
        let before = self.admitted.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(before > 0, "admission slot released twice");
        if before == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn active_count(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Track a freshly accepted transport connection, before any `start`
    /// frame has named the call. Returns a pending id for [`on_start`].
    pub fn on_connected(&self) -> u64 {
        let pending_id = self.next_pending.fetch_add(1, Ordering::Relaxed);
        let ctx = CallContext {
            state: CallState::Connecting,
            call_sid: None,
            stream_sid: None,
            started_at: chrono::Utc::now(),
            audio_received: 0,
            audio_sent: 0,
            error_message: None,
        };
        self.pending.lock().unwrap().insert(pending_id, ctx);
        pending_id
    }

    /// Bind identifiers once the `start` frame arrives, moving the pending
    /// context into the active call map.
    pub fn on_start(&self, pending_id: u64, call_sid: &str, stream_sid: &str) {
        let mut ctx = self
            .pending
            .lock()
            .unwrap()
            .remove(&pending_id)
            .unwrap_or_else(|| {
                warn!(pending_id, "start frame for unknown pending connection");
                CallContext {
                    state: CallState::Connecting,
                    call_sid: None,
                    stream_sid: None,
                    started_at: chrono::Utc::now(),
                    audio_received: 0,
                    audio_sent: 0,
                    error_message: None,
                }
            });

        ctx.state = CallState::Active;
        ctx.call_sid = Some(call_sid.to_string());
        ctx.stream_sid = Some(stream_sid.to_string());
        self.calls.lock().unwrap().insert(call_sid.to_string(), ctx);
        info!(call_sid, stream_sid, "call started");
    }

    /// Forget a pending connection that closed without ever starting.
    pub fn drop_pending(&self, pending_id: u64) {
        self.pending.lock().unwrap().remove(&pending_id);
    }

    pub fn on_stop(&self, call_sid: &str) {
        match self.calls.lock().unwrap().get_mut(call_sid) {
            Some(ctx) => {
                ctx.state = CallState::Stopping;
                info!(call_sid, "call stopping");
            }
            None => warn!(call_sid, "stop for unknown call"),
        }
    }

    pub fn on_error(&self, call_sid: &str, message: &str) {
        match self.calls.lock().unwrap().get_mut(call_sid) {
            Some(ctx) => {
                ctx.state = CallState::Error;
                ctx.error_message = Some(message.to_string());
            }
            None => warn!(call_sid, "error for unknown call: {message}"),
        }
    }

    /// Remove the call's entry, logging its final counters. Idempotent:
    /// cleaning up an unknown id is a logged no-op.
    pub fn cleanup(&self, call_sid: &str, audio_received: u64, audio_sent: u64) {
        match self.calls.lock().unwrap().remove(call_sid) {
            Some(ctx) => {
                let duration = chrono::Utc::now() - ctx.started_at;
                info!(
                    call_sid,
                    duration_secs = duration.num_seconds(),
                    audio_received,
                    audio_sent,
                    "call cleaned up"
                );
            }
            None => warn!(call_sid, "cleanup for unknown call"),
        }
    }

    pub fn get(&self, call_sid: &str) -> Option<CallContext> {
        self.calls.lock().unwrap().get(call_sid).cloned()
    }

    /// Stop admitting new sessions; existing ones keep running.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.drain_started.notify_waiters();
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Resolves once draining has begun.
    pub async fn drained_signal(&self) {
        while !self.is_draining() {
            self.drain_started.notified().await;
        }
    }

    /// Wait until every admitted session has been released, up to `timeout`.
    /// Returns whether the process went idle in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, self.idle.notified())
                .await
                .is_err()
            {
                return self.active_count() == 0;
            }
        }
    }
}
