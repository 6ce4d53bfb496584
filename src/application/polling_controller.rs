// Metrics polling controller - Drives the panel state machine on a tokio task
use crate::application::metrics_gateway::DataFetchGateway;
use crate::application::panel_handle::PanelHandle;
use crate::domain::metrics::FetchParameters;
use crate::domain::panel_machine::{
    Command, ControllerState, DEFAULT_MAX_RETRIES, Effect, Event, PanelMachine, Transition,
};
use crate::domain::panel_view::PanelView;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const COMMAND_BUFFER: usize = 32;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Upper bound on one gateway call before it counts as a failed attempt.
    pub fetch_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

pub struct MetricsPollingController {
    gateway: Arc<dyn DataFetchGateway>,
    settings: ControllerSettings,
    machine: PanelMachine,
    last_updated: Option<DateTime<Utc>>,
    commands_rx: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    view_tx: watch::Sender<PanelView>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsPollingController {
    /// Start a controller for `params` on the current runtime and return the
    /// handle the presentation layer talks to.
    pub fn spawn(
        gateway: Arc<dyn DataFetchGateway>,
        params: FetchParameters,
        settings: ControllerSettings,
    ) -> PanelHandle {
        let machine = PanelMachine::new(params, settings.max_retries);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(PanelView::project(&machine, None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Self {
            gateway,
            settings,
            machine,
            last_updated: None,
            commands_rx,
            events_tx,
            events_rx,
            view_tx,
            shutdown_rx,
        };
        tokio::spawn(controller.run());

        PanelHandle::new(commands_tx, view_rx, shutdown_tx)
    }

    async fn run(mut self) {
        tracing::info!(
            instance_id = %self.machine.params().instance_id,
            window_minutes = self.machine.params().time_window_minutes,
            "Starting metrics polling controller"
        );

        let effect = self.machine.start();
        self.publish();
        self.perform(effect);

        loop {
            tokio::select! {
                // Fires on unmount and when every handle has been dropped.
                _ = self.shutdown_rx.changed() => break,
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.dispatch(Event::Command(command)),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
            }
        }

        tracing::info!(
            instance_id = %self.machine.params().instance_id,
            "Metrics polling controller detached"
        );
    }

    fn dispatch(&mut self, event: Event) {
        let succeeded = matches!(event, Event::FetchSucceeded { .. });
        let failure = match &event {
            Event::FetchFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        let previous = self.machine.state().name();

        match self.machine.handle(event) {
            Transition::Moved { effect } => {
                if succeeded {
                    self.last_updated = Some(Utc::now());
                }
                if let Some(reason) = failure {
                    self.log_failure(&reason);
                }

                tracing::debug!(
                    from = previous,
                    to = self.machine.state().name(),
                    generation = self.machine.generation().0,
                    "Panel transition"
                );

                self.publish();
                if let Some(effect) = effect {
                    self.perform(effect);
                }
            }
            Transition::Ignored => {
                tracing::debug!(state = previous, "Ignoring event in current state");
            }
            Transition::Stale => {
                tracing::debug!(
                    generation = self.machine.generation().0,
                    "Dropping event from superseded generation"
                );
            }
        }
    }

    fn log_failure(&self, reason: &str) {
        match self.machine.state() {
            ControllerState::RetryWait => {
                let failures = self.machine.budget().failures_so_far();
                if failures >= self.settings.max_retries {
                    tracing::error!(
                        failures,
                        "Metrics fetch failed, retries exhausted: {}",
                        reason
                    );
                } else {
                    tracing::warn!(failures, "Metrics fetch failed, retrying: {}", reason);
                }
            }
            // Background refresh failures keep the previous data on screen.
            _ => tracing::debug!("Background refresh failed: {}", reason),
        }
    }

    fn perform(&self, effect: Effect) {
        match effect {
            Effect::Fetch { generation, params } => {
                let gateway = self.gateway.clone();
                let events = self.events_tx.clone();
                let fetch_timeout = self.settings.fetch_timeout;

                tokio::spawn(async move {
                    let mut fetch = tokio::spawn(async move { gateway.fetch(&params).await });
                    let event = match tokio::time::timeout(fetch_timeout, &mut fetch).await {
                        Ok(Ok(Ok(result))) => Event::FetchSucceeded { generation, result },
                        Ok(Ok(Err(e))) => Event::FetchFailed {
                            generation,
                            reason: format!("{:#}", e),
                        },
                        Ok(Err(e)) => Event::FetchFailed {
                            generation,
                            reason: format!("fetch task aborted: {}", e),
                        },
                        Err(_) => {
                            fetch.abort();
                            Event::FetchFailed {
                                generation,
                                reason: format!(
                                    "fetch timed out after {} ms",
                                    fetch_timeout.as_millis()
                                ),
                            }
                        }
                    };
                    // The receiver is gone once the panel has been unmounted.
                    let _ = events.send(event);
                });
            }
            Effect::ScheduleRetry { generation } => {
                let delay = self.settings.retry_delay;
                let events = self.events_tx.clone();

                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Event::RetryElapsed { generation });
                });
            }
        }
    }

    fn publish(&self) {
        let view = PanelView::project(&self.machine, self.last_updated);
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::panel_handle::PanelError;
    use crate::domain::metrics::{FetchResult, TimeSeriesPoint};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    type Reply = (Duration, anyhow::Result<FetchResult>);

    /// Gateway answering from a closure over the parameters and call index.
    struct ScriptedGateway<F> {
        reply: F,
        calls: AtomicUsize,
        started: Mutex<Vec<(Instant, FetchParameters)>>,
    }

    impl<F> ScriptedGateway<F>
    where
        F: Fn(&FetchParameters, usize) -> Reply + Send + Sync + 'static,
    {
        fn new(reply: F) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn started_at(&self) -> Vec<Instant> {
            self.started.lock().unwrap().iter().map(|(at, _)| *at).collect()
        }
    }

    #[async_trait]
    impl<F> DataFetchGateway for ScriptedGateway<F>
    where
        F: Fn(&FetchParameters, usize) -> Reply + Send + Sync + 'static,
    {
        async fn fetch(&self, params: &FetchParameters) -> anyhow::Result<FetchResult> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.started
                .lock()
                .unwrap()
                .push((Instant::now(), params.clone()));
            let (delay, reply) = (self.reply)(params, index);
            tokio::time::sleep(delay).await;
            reply
        }
    }

    fn topics(names: &[&str]) -> anyhow::Result<FetchResult> {
        let mut series = BTreeMap::new();
        for (i, name) in names.iter().enumerate() {
            series.insert(
                name.to_string(),
                vec![TimeSeriesPoint::new(i as i64 * 1_000, i as f64)],
            );
        }
        Ok(FetchResult::new(names.iter().map(|n| n.to_string()), series))
    }

    /// Gateway whose calls never complete.
    #[derive(Default)]
    struct HangingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataFetchGateway for HangingGateway {
        async fn fetch(&self, _params: &FetchParameters) -> anyhow::Result<FetchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(FetchResult::default())
        }
    }

    fn params() -> FetchParameters {
        FetchParameters::new("kafka-1", 60)
    }

    fn spawn_default(gateway: Arc<dyn DataFetchGateway>) -> PanelHandle {
        MetricsPollingController::spawn(gateway, params(), ControllerSettings::default())
    }

    async fn wait_for_state(handle: &PanelHandle, state: &str) -> PanelView {
        let mut rx = handle.subscribe();
        let view = tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|v| v.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("controller dropped the view channel");
        view.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failure_reaches_ready() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, index: usize| match index {
            0 => (Duration::ZERO, Err(anyhow::anyhow!("connection reset"))),
            _ => (Duration::ZERO, topics(&["orders", "clicks"])),
        });
        let handle = spawn_default(gateway.clone());

        let view = wait_for_state(&handle, "ready").await;

        assert_eq!(view.topics, vec!["clicks", "orders"]);
        assert!(!view.is_failed);
        assert!(!view.is_loading);
        assert!(view.last_updated.is_some());
        assert_eq!(gateway.call_count(), 2);

        let started = gateway.started_at();
        assert_eq!(started[1] - started[0], Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_critical_fail_and_refresh() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, index: usize| {
            if index < 3 {
                (Duration::ZERO, Err(anyhow::anyhow!("503 Service Unavailable")))
            } else {
                (Duration::ZERO, topics(&["orders"]))
            }
        });
        let handle = spawn_default(gateway.clone());

        let view = wait_for_state(&handle, "critical_fail").await;
        assert!(view.is_failed);
        assert!(!view.is_loading);
        assert_eq!(view.failures_so_far, 3);

        // No fourth automatic attempt.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.call_count(), 3);
        let started = gateway.started_at();
        assert_eq!(started[1] - started[0], Duration::from_millis(1000));
        assert_eq!(started[2] - started[1], Duration::from_millis(1000));

        handle.refresh().await.unwrap();
        let view = wait_for_state(&handle, "ready").await;
        assert_eq!(view.failures_so_far, 0);
        assert_eq!(view.topics, vec!["orders"]);
        assert_eq!(gateway.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_topics_is_no_data_without_retry() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, index: usize| match index {
            0 => (Duration::ZERO, Ok(FetchResult::default())),
            _ => (Duration::ZERO, topics(&["orders"])),
        });
        let handle = spawn_default(gateway.clone());

        let view = wait_for_state(&handle, "no_data").await;
        assert!(view.is_data_unavailable);
        assert!(view.topics.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.call_count(), 1);

        handle.refresh().await.unwrap();
        let view = wait_for_state(&handle, "ready").await;
        assert!(!view.is_data_unavailable);
        assert_eq!(view.topics, vec!["orders"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_failure_keeps_prior_data() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, index: usize| match index {
            0 => (Duration::ZERO, topics(&["orders", "clicks"])),
            _ => (Duration::from_millis(500), Err(anyhow::anyhow!("timeout"))),
        });
        let handle = spawn_default(gateway.clone());

        let before = wait_for_state(&handle, "ready").await;

        handle.refresh().await.unwrap();
        let during = wait_for_state(&handle, "refreshing").await;
        assert!(!during.is_loading);
        assert_eq!(during.series, before.series);
        assert_eq!(during.topics, before.topics);

        let after = wait_for_state(&handle, "ready").await;
        assert!(!after.is_failed);
        assert_eq!(after.series, before.series);
        assert_eq!(after.topics, before.topics);
        assert_eq!(after.last_updated, before.last_updated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_generation_wins_over_arrival_order() {
        let gateway = ScriptedGateway::new(|params: &FetchParameters, _: usize| {
            match (params.selected_topic.as_deref(), params.time_window_minutes) {
                (None, 60) => (Duration::from_secs(5), topics(&["first"])),
                (Some(_), 60) => (Duration::from_secs(3), topics(&["second"])),
                _ => (Duration::from_millis(10), topics(&["latest"])),
            }
        });
        let handle = spawn_default(gateway.clone());

        handle.select_topic(Some("orders".to_string())).await.unwrap();
        handle.change_time_window(15).await.unwrap();

        wait_for_state(&handle, "ready").await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let view = handle.view();
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(view.state, "ready");
        assert_eq!(view.topics, vec!["latest"]);
        assert_eq!(view.selected_topic.as_deref(), Some("orders"));
        assert_eq!(view.time_window_minutes, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_detaches_from_late_results() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, _: usize| {
            (Duration::from_secs(1), topics(&["orders"]))
        });
        let handle = spawn_default(gateway.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.unmount();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let view = handle.view();
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(view.state, "loading");
        assert!(view.topics.is_empty());
        assert!(handle.is_detached());
        assert_eq!(handle.refresh().await, Err(PanelError::Detached));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_minute_window_is_rejected() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, _: usize| {
            (Duration::ZERO, topics(&["orders"]))
        });
        let handle = spawn_default(gateway.clone());

        assert_eq!(
            handle.change_time_window(0).await,
            Err(PanelError::InvalidTimeWindow(0))
        );
        let view = wait_for_state(&handle, "ready").await;
        assert_eq!(view.time_window_minutes, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_settings_shorten_backoff() {
        let gateway = ScriptedGateway::new(|_: &FetchParameters, _: usize| {
            (Duration::ZERO, Err(anyhow::anyhow!("refused")))
        });
        let settings = ControllerSettings {
            max_retries: 1,
            retry_delay: Duration::from_millis(250),
            fetch_timeout: Duration::from_secs(5),
        };
        let handle = MetricsPollingController::spawn(gateway.clone(), params(), settings);

        let start = Instant::now();
        wait_for_state(&handle, "critical_fail").await;
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out_into_critical_fail() {
        let gateway = Arc::new(HangingGateway::default());
        let handle = spawn_default(gateway.clone());

        let start = Instant::now();
        let view = wait_for_state(&handle, "critical_fail").await;

        // Each attempt waits out the fetch timeout and then the retry delay.
        assert_eq!(start.elapsed(), Duration::from_secs(3 * (30 + 1)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
        assert_eq!(view.failures_so_far, 3);
        assert!(view.is_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_topic_during_retry_wait_drops_old_timer() {
        let gateway = ScriptedGateway::new(|params: &FetchParameters, _: usize| {
            match params.selected_topic.as_deref() {
                None => (Duration::ZERO, Err(anyhow::anyhow!("connection reset"))),
                Some(_) => (Duration::from_secs(2), topics(&["orders"])),
            }
        });
        let handle = spawn_default(gateway.clone());

        wait_for_state(&handle, "retry_wait").await;
        handle.select_topic(Some("orders".to_string())).await.unwrap();

        // The superseded retry timer fires here without starting another fetch.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let view = handle.view();
        assert_eq!(view.state, "loading");
        assert_eq!(view.failures_so_far, 0);
        assert_eq!(gateway.call_count(), 2);

        let view = wait_for_state(&handle, "ready").await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.call_count(), 2);
        assert_eq!(handle.view(), view);
        assert_eq!(view.selected_topic.as_deref(), Some("orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_topic_during_refreshing_discards_late_result() {
        let gateway = ScriptedGateway::new(|params: &FetchParameters, index: usize| {
            match (params.selected_topic.as_deref(), index) {
                (None, 0) => (Duration::ZERO, topics(&["orders", "clicks"])),
                (None, _) => (Duration::from_secs(5), topics(&["stale"])),
                (Some(_), _) => (Duration::from_secs(1), topics(&["fresh"])),
            }
        });
        let handle = spawn_default(gateway.clone());

        wait_for_state(&handle, "ready").await;
        handle.refresh().await.unwrap();
        wait_for_state(&handle, "refreshing").await;
        handle.select_topic(Some("orders".to_string())).await.unwrap();

        let fresh = wait_for_state(&handle, "ready").await;
        assert_eq!(fresh.series.keys().collect::<Vec<_>>(), vec!["fresh"]);

        // The background refresh answers after the topic change and is dropped.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = handle.view();
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(view, fresh);
        assert_eq!(view.topics, vec!["clicks", "fresh", "orders"]);
    }
}
