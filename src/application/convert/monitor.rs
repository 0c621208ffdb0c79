use std::{collections::BTreeSet, time::Duration};

use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::application::{
    engine::{EngineEvent, EngineEvents, describe_script_error},
    error::ConversionError,
};

use super::{signals::SignalTable, tracker::ResourceTracker};

/// Request-scoped observer of one engine page's side channels.
///
/// Console messages feed the [`SignalTable`], network events feed the
/// [`ResourceTracker`], script errors are held until the pipeline checks them.
pub struct PageMonitor {
    events: EngineEvents,
    signals: SignalTable,
    tracker: ResourceTracker,
    script_error: Option<String>,
    disconnected: bool,
}

impl PageMonitor {
    pub fn new(events: EngineEvents) -> Self {
        Self {
            events,
            signals: SignalTable::new(),
            tracker: ResourceTracker::new(),
            script_error: None,
            disconnected: false,
        }
    }

    /// Drain every event the engine has delivered so far without suspending.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Console(message) => {
                debug!(
                    target = "chartexport::engine::console",
                    message = %message,
                    "engine console"
                );
                self.signals.record(message);
            }
            EngineEvent::ResourceRequested { url } => {
                debug!(target = "chartexport::engine::network", url = %url, "resource requested");
                self.tracker.request_started(&url);
            }
            EngineEvent::ResourceReceived { url, stage } => {
                debug!(
                    target = "chartexport::engine::network",
                    url = %url,
                    stage = ?stage,
                    "resource received"
                );
                self.tracker.response_received(&url, stage);
            }
            EngineEvent::ResourceFailed { url, reason } => {
                debug!(
                    target = "chartexport::engine::network",
                    url = %url,
                    reason = %reason,
                    "resource failed"
                );
                self.tracker.request_failed(&url);
            }
            EngineEvent::ScriptError { message, trace } => {
                let described = describe_script_error(&message, &trace);
                warn!(
                    target = "chartexport::engine::script",
                    error = %described,
                    "engine reported a script error"
                );
                if self.script_error.is_none() {
                    self.script_error = Some(described);
                }
            }
        }
    }

    pub fn signals(&self) -> &SignalTable {
        &self.signals
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn pending_resources(&mut self) -> BTreeSet<String> {
        self.pump();
        self.tracker.pending()
    }

    pub fn has_pending_resources(&mut self) -> bool {
        self.pump();
        self.tracker.has_pending()
    }

    /// Surface the first script error reported so far.
    pub fn check_script_error(&mut self) -> Result<(), ConversionError> {
        self.pump();
        match self.script_error.take() {
            Some(message) => Err(ConversionError::render_failure(message)),
            None => Ok(()),
        }
    }

    /// Suspend until `signal` is observed, a script error arrives or `limit` elapses.
    pub async fn wait_for_signal(
        &mut self,
        signal: &str,
        limit: Duration,
    ) -> Result<(), ConversionError> {
        self.pump();
        let deadline = Instant::now() + limit;

        loop {
            self.check_script_error()?;
            if self.signals.observed(signal) {
                return Ok(());
            }
            if self.disconnected {
                return Err(ConversionError::render_failure(format!(
                    "engine page closed before `{signal}` was signalled"
                )));
            }

            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => self.disconnected = true,
                },
                _ = sleep_until(deadline) => {
                    return Err(ConversionError::render_failure(format!(
                        "Timed out after {} ms waiting for `{signal}`",
                        limit.as_millis()
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::application::engine::{ResponseStage, TraceFrame, event_channel};

    use super::*;

    #[test]
    fn pump_routes_events_to_tables() {
        let (sink, events) = event_channel();
        let mut monitor = PageMonitor::new(events);

        sink.send(EngineEvent::Console("binding:options:parsed".into()))
            .expect("send");
        sink.send(EngineEvent::ResourceRequested {
            url: "http://a/1.png".into(),
        })
        .expect("send");
        sink.send(EngineEvent::ResourceReceived {
            url: "http://a/1.png".into(),
            stage: ResponseStage::Start,
        })
        .expect("send");

        monitor.pump();
        assert!(monitor.signals().observed("binding:options:parsed"));
        assert!(monitor.has_pending_resources());
    }

    #[test]
    fn script_errors_surface_once_as_render_failures() {
        let (sink, events) = event_channel();
        let mut monitor = PageMonitor::new(events);
        sink.send(EngineEvent::ScriptError {
            message: "ReferenceError: Highcharts is not defined".into(),
            trace: vec![TraceFrame {
                file: "page".into(),
                line: 3,
                function: None,
            }],
        })
        .expect("send");

        let err = monitor.check_script_error().expect_err("script error");
        assert_eq!(
            err.to_string(),
            "ReferenceError: Highcharts is not defined\nTRACE:\n -> page: 3"
        );
        assert!(monitor.check_script_error().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_signal_resolves_when_signal_arrives() {
        let (sink, events) = event_channel();
        let mut monitor = PageMonitor::new(events);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = sink.send(EngineEvent::Console("chart:load:called".into()));
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        monitor
            .wait_for_signal("chart:load:called", Duration::from_secs(5))
            .await
            .expect("signal observed");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_signal_times_out() {
        let (sink, events) = event_channel();
        let mut monitor = PageMonitor::new(events);

        let err = monitor
            .wait_for_signal("chart:load:called", Duration::from_secs(1))
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("Timed out after 1000 ms"));
        drop(sink);
    }

    #[tokio::test]
    async fn wait_for_signal_fails_when_page_goes_away() {
        let (sink, events) = event_channel();
        let mut monitor = PageMonitor::new(events);
        drop(sink);

        let err = monitor
            .wait_for_signal("chart:load:called", Duration::from_secs(1))
            .await
            .expect_err("disconnected");
        assert!(err.to_string().contains("closed"));
    }
}
