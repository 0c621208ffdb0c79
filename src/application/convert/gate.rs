//! Bounded wait for external resources before rasterizing.

use std::{collections::BTreeSet, time::Duration};

use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, warn};

use super::monitor::PageMonitor;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const RESOURCE_DEADLINE: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Ready,
    TimedOut(BTreeSet<String>),
}

/// Polls the page's resource state on a fixed interval against one deadline.
///
/// Polling rather than waiting on events: engines under-report loads served
/// from cache, so the tracker is re-read on every tick.
#[derive(Debug, Clone, Copy)]
pub struct CompletionGate {
    interval: Duration,
    deadline: Duration,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new(POLL_INTERVAL, RESOURCE_DEADLINE)
    }
}

impl CompletionGate {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub async fn wait(&self, monitor: &mut PageMonitor) -> GateOutcome {
        let started = Instant::now();
        let deadline = sleep(self.deadline);
        tokio::pin!(deadline);

        let mut ticker = interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    let pending = monitor.pending_resources();
                    if pending.is_empty() {
                        return GateOutcome::Ready;
                    }
                    warn!(
                        target = "chartexport::convert::gate",
                        pending = pending.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "resource deadline reached"
                    );
                    return GateOutcome::TimedOut(pending);
                }
                _ = ticker.tick() => {
                    if !monitor.has_pending_resources() {
                        debug!(
                            target = "chartexport::convert::gate",
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "resources settled"
                        );
                        return GateOutcome::Ready;
                    }
                }
            }
        }
    }
}
