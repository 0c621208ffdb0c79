use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use metrics::{counter, gauge, histogram};
use tracing::info;

/// Process-wide request counters of the export server.
#[derive(Debug, Default, Clone)]
pub struct RenderMonitor {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub in_flight: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Ok,
    Failed,
    TimedOut,
}

impl RenderOutcome {
    fn as_str(self) -> &'static str {
        match self {
            RenderOutcome::Ok => "ok",
            RenderOutcome::Failed => "error",
            RenderOutcome::TimedOut => "timeout",
        }
    }
}

impl RenderMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("chartexport_requests_total").increment(1);
        gauge!("chartexport_renders_in_flight").set(in_flight as f64);
    }

    pub fn finished(&self, outcome: RenderOutcome, elapsed_ms: u64) {
        let in_flight = self
            .inner
            .in_flight
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        gauge!("chartexport_renders_in_flight").set(in_flight as f64);
        histogram!("chartexport_render_ms").record(elapsed_ms as f64);

        match outcome {
            RenderOutcome::Ok => {}
            RenderOutcome::Failed => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                counter!("chartexport_request_failures_total").increment(1);
            }
            RenderOutcome::TimedOut => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                counter!("chartexport_request_failures_total").increment(1);
                counter!("chartexport_request_timeouts_total").increment(1);
            }
        }

        let snapshot = self.snapshot();
        info!(
            target = "chartexport::http::monitor",
            result = outcome.as_str(),
            elapsed_ms,
            requests = snapshot.requests,
            failures = snapshot.failures,
            timeouts = snapshot.timeouts,
            in_flight = snapshot.in_flight,
            "render finished"
        );
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            requests: self.inner.requests.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_per_kind() {
        let monitor = RenderMonitor::new();
        for outcome in [RenderOutcome::Ok, RenderOutcome::Failed, RenderOutcome::TimedOut] {
            monitor.started();
            monitor.finished(outcome, 5);
        }

        assert_eq!(
            monitor.snapshot(),
            MonitorSnapshot {
                requests: 3,
                failures: 2,
                timeouts: 1,
                in_flight: 0,
            }
        );
    }

    #[test]
    fn clones_share_counters() {
        let monitor = RenderMonitor::new();
        let clone = monitor.clone();
        clone.started();
        assert_eq!(monitor.snapshot().in_flight, 1);
    }
}
