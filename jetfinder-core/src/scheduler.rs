//! Periodic engine cycle
//!
//! ```text
//! tick ─► drain queue ─► skip if empty / game ended
//!              │
//!              ▼
//!          aggregate ─► skip if nothing valid
//!              │
//!              ▼  (spawned, does not hold up the next tick)
//!   ┌──────────────────────────────────────────────┐
//!   │ wait for in-flight permit                    │
//!   │ report ─► reconcile ─► publish to StateHub   │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! The timer loop never awaits network I/O. Each dispatched cycle runs as its
//! own task, limited by a semaphore of `engine.max_in_flight` permits. With
//! the default of one permit, cycles reconcile strictly in tick order.
//!
//! Cycles waiting for a permit are capped at one. While the backend is
//! behind, later ticks leave sightings in the queue; the next dispatched
//! cycle aggregates them, so a slow backend never receives stale batches.
//!
//! Every spawned cycle checks the shutdown token before touching state, so
//! work still in flight after shutdown finishes as a no-op.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::aggregate::aggregate;
use crate::api::ProximityClient;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::hub::StateHub;
use crate::progress::{ProgressTracker, Reconciliation};
use crate::queue::SightingQueue;
use crate::types::{AggregatedReport, CycleSummary, ProximityResult};

/// What the timer side of a cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No sightings were waiting
    Idle,
    /// The game is over; sightings were discarded
    GameEnded,
    /// Sightings were drained but none was valid
    NothingToReport,
    /// Earlier cycles are still pending; sightings stay queued
    Backlogged { pending: usize },
    /// A report task was spawned
    Dispatched { entries: usize },
}

/// What a dispatched report task did
#[derive(Debug)]
pub enum ReportOutcome {
    Reconciled {
        result: ProximityResult,
        reconciliation: Reconciliation,
    },
    /// The backend call failed; state is unchanged
    ReportFailed(Error),
    /// No game config yet; state is unchanged
    ConfigMissing,
    /// Another cycle ended the game while this one waited
    GameEnded,
    /// Shutdown was requested before the cycle could publish
    Cancelled,
}

/// Drives one cycle per poll interval
pub struct Scheduler {
    queue: SightingQueue,
    client: Arc<dyn ProximityClient>,
    tracker: Arc<ProgressTracker>,
    hub: Arc<StateHub>,
    interval: Duration,
    permits: Arc<Semaphore>,
    /// Cycles allowed in the join set: in flight plus one waiting
    max_cycles: usize,
}

impl Scheduler {
    pub fn new(
        queue: SightingQueue,
        client: Arc<dyn ProximityClient>,
        tracker: Arc<ProgressTracker>,
        hub: Arc<StateHub>,
        config: &EngineConfig,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            client,
            tracker,
            hub,
            interval: config.poll_interval(),
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            max_cycles: config.max_in_flight + 1,
        })
    }

    /// Runs cycles until shutdown is signalled, then waits for in-flight
    /// cycles to wind down.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<ReportOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(in_flight = tasks.len(), "Scheduler shutting down");
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_joined(joined);
                }

                _ = ticker.tick() => {
                    let outcome = self.tick(&shutdown, &mut tasks);
                    trace!(?outcome, "Tick");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_joined(joined);
        }
        info!("Scheduler stopped");
    }

    /// Run the timer side of one cycle, spawning the report task into `tasks`
    pub fn tick(
        &self,
        shutdown: &CancellationToken,
        tasks: &mut JoinSet<ReportOutcome>,
    ) -> CycleOutcome {
        let pending = self.queue.pending();
        if pending == 0 {
            return CycleOutcome::Idle;
        }

        if tasks.len() >= self.max_cycles {
            debug!(
                pending,
                cycles = tasks.len(),
                "Backend is behind, holding sightings for a later cycle"
            );
            return CycleOutcome::Backlogged { pending };
        }

        let batch = self.queue.drain_all();
        if batch.is_empty() {
            return CycleOutcome::Idle;
        }

        if self.tracker.is_game_ended() {
            trace!(discarded = batch.len(), "Game ended, ignoring sightings");
            return CycleOutcome::GameEnded;
        }

        let Some(report) = aggregate(&batch) else {
            return CycleOutcome::NothingToReport;
        };

        let entries = report.len();
        debug!(sightings = batch.len(), entries, "Dispatching cycle");

        tasks.spawn(run_report(
            report,
            Arc::clone(&self.client),
            Arc::clone(&self.tracker),
            Arc::clone(&self.hub),
            Arc::clone(&self.permits),
            shutdown.clone(),
        ));

        CycleOutcome::Dispatched { entries }
    }
}

/// Report, reconcile and publish one aggregated batch
async fn run_report(
    report: AggregatedReport,
    client: Arc<dyn ProximityClient>,
    tracker: Arc<ProgressTracker>,
    hub: Arc<StateHub>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) -> ReportOutcome {
    let _permit = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return ReportOutcome::Cancelled,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ReportOutcome::Cancelled,
        },
    };

    if tracker.is_game_ended() {
        return ReportOutcome::GameEnded;
    }

    let response = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return ReportOutcome::Cancelled,
        response = client.report(&report) => response,
    };

    if shutdown.is_cancelled() {
        return ReportOutcome::Cancelled;
    }

    let result = match response {
        Ok(result) => result,
        Err(e) => {
            hub.publish_proximity(None);
            return ReportOutcome::ReportFailed(e);
        }
    };

    let reconciliation = match tracker.reconcile(&result) {
        Ok(reconciliation) => reconciliation,
        Err(Error::GameConfigMissing) => return ReportOutcome::ConfigMissing,
        Err(e) => return ReportOutcome::ReportFailed(e),
    };

    hub.publish_proximity(Some(result.clone()));
    hub.publish_state(&reconciliation.state);
    hub.complete_cycle(CycleSummary {
        discovered_count: reconciliation.discovered_count,
        nearest_signal_strength: result.nearest_signal_strength,
        current_discovered_id: reconciliation.state.current_discovered_id,
        is_game_ended: reconciliation.state.is_game_ended,
    });

    ReportOutcome::Reconciled {
        result,
        reconciliation,
    }
}

fn log_joined(joined: Result<ReportOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => log_report_outcome(&outcome),
        Err(e) => error!(error = %e, "Cycle task panicked"),
    }
}

/// Central logging for per-cycle results
pub fn log_report_outcome(outcome: &ReportOutcome) {
    match outcome {
        ReportOutcome::Reconciled {
            result,
            reconciliation,
        } => {
            debug!(
                discovered = ?result.discovered_ids,
                nearest = ?result.nearest_signal_strength,
                new = ?reconciliation.new_ids,
                current = ?reconciliation.state.current_discovered_id,
                ended = reconciliation.state.is_game_ended,
                "Cycle reconciled"
            );
            if reconciliation.state.is_game_ended {
                info!(
                    collected = reconciliation.state.collected_ids.len(),
                    "Game complete"
                );
            }
        }
        ReportOutcome::ReportFailed(e) => warn!(error = %e, "Can't get proximity"),
        ReportOutcome::ConfigMissing => error!("Game config is not loaded, skipping reconciliation"),
        ReportOutcome::GameEnded => debug!("Game ended before cycle ran"),
        ReportOutcome::Cancelled => debug!("Cycle cancelled by shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CollectedPolicy;
    use crate::storage::Store;
    use crate::types::{GameConfig, Sighting};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted responses and records every report it receives
    struct ScriptedClient {
        responses: Mutex<VecDeque<crate::error::Result<ProximityResult>>>,
        calls: Mutex<Vec<AggregatedReport>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<crate::error::Result<ProximityResult>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl ProximityClient for ScriptedClient {
        async fn report(
            &self,
            report: &AggregatedReport,
        ) -> crate::error::Result<ProximityResult> {
            self.calls.lock().push(report.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Http("no scripted response".to_string())))
        }
    }

    fn found(ids: &[i64]) -> crate::error::Result<ProximityResult> {
        Ok(ProximityResult {
            discovered_ids: ids.to_vec(),
            nearest_signal_strength: Some(-48),
        })
    }

    struct Fixture {
        queue: SightingQueue,
        client: Arc<ScriptedClient>,
        tracker: Arc<ProgressTracker>,
        hub: Arc<StateHub>,
        scheduler: Scheduler,
    }

    fn fixture(
        responses: Vec<crate::error::Result<ProximityResult>>,
        config: Option<GameConfig>,
    ) -> Fixture {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        let tracker =
            Arc::new(ProgressTracker::new(Arc::new(store), CollectedPolicy::Union).unwrap());
        if let Some(config) = config {
            tracker.set_config(config);
        }
        let queue = SightingQueue::new();
        let client = ScriptedClient::new(responses);
        let hub = Arc::new(StateHub::new());
        let scheduler = Scheduler::new(
            queue.clone(),
            client.clone(),
            tracker.clone(),
            hub.clone(),
            &EngineConfig::default(),
        )
        .unwrap();
        Fixture {
            queue,
            client,
            tracker,
            hub,
            scheduler,
        }
    }

    async fn one_cycle(f: &Fixture) -> (CycleOutcome, Option<ReportOutcome>) {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let outcome = f.scheduler.tick(&shutdown, &mut tasks);
        let report = tasks.join_next().await.map(|r| r.unwrap());
        (outcome, report)
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_call() {
        let f = fixture(vec![found(&[1])], Some(GameConfig { winner_count: 3 }));
        let (outcome, report) = one_cycle(&f).await;
        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(report.is_none());
        assert_eq!(f.client.calls(), 0);
        assert_eq!(f.tracker.state(), Default::default());
    }

    #[tokio::test]
    async fn test_invalid_only_batch_makes_no_call() {
        let f = fixture(vec![found(&[1])], Some(GameConfig { winner_count: 3 }));
        f.queue.push(Sighting::new("a", 0));
        let (outcome, _) = one_cycle(&f).await;
        assert_eq!(outcome, CycleOutcome::NothingToReport);
        assert_eq!(f.client.calls(), 0);
    }

    #[tokio::test]
    async fn test_cycle_reports_deduplicated_batch() {
        let f = fixture(vec![found(&[4])], Some(GameConfig { winner_count: 3 }));
        f.queue.push(Sighting::new("A", -40));
        f.queue.push(Sighting::new("B", 3));
        f.queue.push(Sighting::new("A", -55));

        let (outcome, report) = one_cycle(&f).await;
        assert_eq!(outcome, CycleOutcome::Dispatched { entries: 1 });
        assert!(matches!(report, Some(ReportOutcome::Reconciled { .. })));

        let calls = f.client.calls.lock();
        assert_eq!(calls[0].entries()[0].signal_strength, -55);
        drop(calls);

        assert_eq!(f.tracker.state().collected_ids, vec![4]);
        assert_eq!(
            f.hub.proximity().get().map(|p| p.discovered_ids),
            Some(vec![4])
        );
    }

    #[tokio::test]
    async fn test_first_cycle_suppressed_second_announces() {
        let f = fixture(
            vec![found(&[1]), found(&[1, 2])],
            Some(GameConfig { winner_count: 5 }),
        );
        let mut current = f.hub.current_discovered_id().subscribe();
        assert_eq!(current.try_recv(), Some(None));

        f.queue.push(Sighting::new("x", -30));
        one_cycle(&f).await;
        assert_eq!(f.hub.current_discovered_id().get(), None);
        assert_eq!(current.try_recv(), None);

        f.queue.push(Sighting::new("x", -30));
        one_cycle(&f).await;
        assert_eq!(f.hub.current_discovered_id().get(), Some(2));
        assert_eq!(current.try_recv(), Some(Some(2)));
    }

    #[tokio::test]
    async fn test_failure_leaves_state_unchanged() {
        let f = fixture(
            vec![found(&[1]), Err(Error::Http("timeout".to_string()))],
            Some(GameConfig { winner_count: 5 }),
        );
        f.queue.push(Sighting::new("x", -30));
        one_cycle(&f).await;
        let before = f.tracker.state();

        f.queue.push(Sighting::new("x", -30));
        let (_, report) = one_cycle(&f).await;
        assert!(matches!(report, Some(ReportOutcome::ReportFailed(_))));
        assert_eq!(f.tracker.state(), before);
        assert_eq!(f.hub.proximity().get(), None);
    }

    #[tokio::test]
    async fn test_missing_config_skips_reconciliation() {
        let f = fixture(vec![found(&[1])], None);
        f.queue.push(Sighting::new("x", -30));
        let (_, report) = one_cycle(&f).await;
        assert!(matches!(report, Some(ReportOutcome::ConfigMissing)));
        assert!(f.tracker.state().collected_ids.is_empty());
        assert_eq!(f.hub.proximity().get(), None);
    }

    #[tokio::test]
    async fn test_ended_game_discards_sightings() {
        let f = fixture(
            vec![found(&[1, 2]), found(&[1, 2])],
            Some(GameConfig { winner_count: 2 }),
        );
        f.queue.push(Sighting::new("x", -30));
        one_cycle(&f).await;
        assert!(f.tracker.is_game_ended());
        assert!(f.hub.is_game_ended().get());

        f.queue.push(Sighting::new("x", -30));
        let (outcome, report) = one_cycle(&f).await;
        assert_eq!(outcome, CycleOutcome::GameEnded);
        assert!(report.is_none());
        assert_eq!(f.client.calls(), 1);
        assert_eq!(f.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_does_not_publish() {
        let f = fixture(vec![found(&[1])], Some(GameConfig { winner_count: 5 }));
        f.queue.push(Sighting::new("x", -30));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut tasks = JoinSet::new();
        f.scheduler.tick(&shutdown, &mut tasks);
        let report = tasks.join_next().await.unwrap().unwrap();

        assert!(matches!(report, ReportOutcome::Cancelled));
        assert!(f.tracker.state().collected_ids.is_empty());
        assert_eq!(f.hub.proximity().get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_until_shutdown() {
        let f = fixture(
            vec![found(&[1]), found(&[1, 2])],
            Some(GameConfig { winner_count: 5 }),
        );
        let Fixture {
            queue,
            client,
            tracker,
            scheduler,
            ..
        } = f;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        // First tick fires immediately with nothing queued
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.calls(), 0);

        queue.push(Sighting::new("x", -30));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(client.calls(), 1);

        queue.push(Sighting::new("y", -31));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(client.calls(), 2);
        assert_eq!(tracker.state().collected_ids, vec![1, 2]);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_engine_config() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        let tracker =
            Arc::new(ProgressTracker::new(Arc::new(store), CollectedPolicy::Union).unwrap());
        let config = EngineConfig {
            poll_interval_ms: 0,
            ..EngineConfig::default()
        };

        let result = Scheduler::new(
            SightingQueue::new(),
            ScriptedClient::new(vec![]),
            tracker,
            Arc::new(StateHub::new()),
            &config,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_holds_sightings_while_cycles_are_pending() {
        let f = fixture(
            vec![found(&[1]), found(&[1]), found(&[1])],
            Some(GameConfig { winner_count: 5 }),
        );
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        f.queue.push(Sighting::new("a", -40));
        assert_eq!(
            f.scheduler.tick(&shutdown, &mut tasks),
            CycleOutcome::Dispatched { entries: 1 }
        );
        f.queue.push(Sighting::new("b", -41));
        assert_eq!(
            f.scheduler.tick(&shutdown, &mut tasks),
            CycleOutcome::Dispatched { entries: 1 }
        );

        // One in flight, one waiting: further batches stay queued
        f.queue.push(Sighting::new("c", -42));
        f.queue.push(Sighting::new("c", -43));
        assert_eq!(
            f.scheduler.tick(&shutdown, &mut tasks),
            CycleOutcome::Backlogged { pending: 2 }
        );
        assert_eq!(tasks.len(), 2);
        assert_eq!(f.queue.pending(), 2);

        while tasks.join_next().await.is_some() {}
        assert_eq!(
            f.scheduler.tick(&shutdown, &mut tasks),
            CycleOutcome::Dispatched { entries: 1 }
        );
        tasks.join_next().await.unwrap().unwrap();

        let calls = f.client.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].entries()[0].signal_strength, -43);
    }

    /// Answers every report after a fixed delay
    struct SlowClient {
        delay: Duration,
        calls: Mutex<Vec<AggregatedReport>>,
    }

    #[async_trait]
    impl ProximityClient for SlowClient {
        async fn report(
            &self,
            report: &AggregatedReport,
        ) -> crate::error::Result<ProximityResult> {
            self.calls.lock().push(report.clone());
            tokio::time::sleep(self.delay).await;
            Ok(ProximityResult::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_does_not_build_a_backlog() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        let tracker =
            Arc::new(ProgressTracker::new(Arc::new(store), CollectedPolicy::Union).unwrap());
        tracker.set_config(GameConfig { winner_count: 5 });
        let queue = SightingQueue::new();
        let client = Arc::new(SlowClient {
            delay: Duration::from_secs(10),
            calls: Mutex::new(Vec::new()),
        });
        let scheduler = Scheduler::new(
            queue.clone(),
            client.clone(),
            tracker,
            Arc::new(StateHub::new()),
            &EngineConfig::default(),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        // One fresh beacon per second for a minute, between ticks
        tokio::time::sleep(Duration::from_millis(500)).await;
        for i in 0..60 {
            queue.push(Sighting::new(format!("beacon-{}", i), -50));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // A 10 s backend can take at most one call per 10 s
        let during = client.calls.lock().len();
        assert!(during <= 7, "{} calls while scanning", during);

        // The leftover sightings go out in at most two more calls
        tokio::time::sleep(Duration::from_secs(60)).await;
        let settled = client.calls.lock().len();
        assert!(settled <= during + 2, "{} calls after {}", settled, during);
        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(client.calls.lock().len(), settled);
        assert_eq!(queue.pending(), 0);

        // Every sighting was reported, the last one included
        let calls = client.calls.lock();
        let reported: usize = calls.iter().map(|r| r.len()).sum();
        assert_eq!(reported, 60);
        assert!(calls
            .last()
            .unwrap()
            .entries()
            .iter()
            .any(|e| e.fingerprint == crate::types::Fingerprint::of("beacon-59")));
        drop(calls);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
