//! Process counters exposed through `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct Metrics {
    calls_total: AtomicU64,
    errors_total: AtomicU64,
    calls_completed: AtomicU64,
    call_duration_ms_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call_started(&self) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_finished(&self, duration: Option<Duration>) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
        if let Some(d) = duration {
            self.call_duration_ms_total
                .fetch_add(d.as_millis() as u64, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Average completed-call duration in seconds.
    pub fn avg_call_duration_secs(&self) -> f64 {
        let completed = self.calls_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        let total_ms = self.call_duration_ms_total.load(Ordering::Relaxed);
        total_ms as f64 / 1000.0 / completed as f64
    }

    /// Text exposition for `/metrics`.
    pub fn render(&self, active_calls: usize) -> String {
        format!(
            "calls_total {}\ncalls_active {}\nerrors_total {}\ncall_duration_seconds_avg {:.3}\n",
            self.calls_total(),
            active_calls,
            self.errors_total(),
            self.avg_call_duration_secs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_call_started();
        metrics.record_call_started();
        metrics.record_error();
        metrics.record_call_finished(Some(Duration::from_secs(10)));
        metrics.record_call_finished(Some(Duration::from_secs(20)));

        assert_eq!(metrics.calls_total(), 2);
        assert_eq!(metrics.errors_total(), 1);
        assert!((metrics.avg_call_duration_secs() - 15.0).abs() < 0.001);
    }

    #[test]
    fn render_is_one_line_per_counter() {
        let metrics = Metrics::new();
        metrics.record_call_started();
        let text = metrics.render(1);
        assert!(text.contains("calls_total 1"));
        assert!(text.contains("calls_active 1"));
        assert!(text.contains("errors_total 0"));
        assert!(text.contains("call_duration_seconds_avg 0.000"));
    }
}
