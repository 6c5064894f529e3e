//! Observable game state
//!
//! The [`StateHub`] is the single place UI observers and the companion
//! device learn about progress. It holds three replay-latest values:
//!
//! - current discovered spot id
//! - game-ended flag
//! - latest proximity result
//!
//! plus a push-only stream of [`CycleSummary`] values.
//!
//! Every subscriber gets its own unbounded channel. Publishing never waits
//! on a subscriber, and a slow subscriber still sees every change in order.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{CycleSummary, GameState, ProximityResult};

/// Signal strength magnitude mapped to the far edge of the search indicator
const MAX_SIGNAL_DISTANCE: f32 = 100.0;

struct Subscribers<T> {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<T>)>,
}

impl<T: Clone> Subscribers<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            senders: Vec::new(),
        }
    }

    fn add(&mut self, initial: Option<T>) -> (u64, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(value) = initial {
            let _ = tx.send(value);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.senders.push((id, tx));
        (id, rx)
    }

    fn remove(&mut self, id: u64) {
        self.senders.retain(|(sid, _)| *sid != id);
    }

    fn notify(&mut self, value: &T) {
        // Receivers dropped without unsubscribing are pruned here
        self.senders.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    fn len(&self) -> usize {
        self.senders.len()
    }
}

struct ObservableInner<T> {
    value: T,
    subscribers: Subscribers<T>,
}

/// Value holder with replay-latest subscriptions
pub struct Observable<T> {
    inner: Arc<Mutex<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ObservableInner {
                value: initial,
                subscribers: Subscribers::new(),
            })),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Replace the value, notifying subscribers if it changed.
    ///
    /// Returns true when the value changed.
    pub fn set(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.value == value {
            return false;
        }
        inner.subscribers.notify(&value);
        inner.value = value;
        true
    }

    /// Subscribe to this value.
    ///
    /// The current value is the first item received, followed by every
    /// later change.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut inner = self.inner.lock();
        // Queued under the lock so no change can slip in ahead of it
        let current = inner.value.clone();
        let (id, rx) = inner.subscribers.add(Some(current));
        let weak: Weak<Mutex<ObservableInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            rx,
            detach: Some(Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().subscribers.remove(id);
                }
            })),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Push-only fan-out without replay
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers::new())),
        }
    }

    pub fn publish(&self, value: T) {
        self.inner.lock().notify(&value);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (id, rx) = self.inner.lock().add(None);
        let weak = Arc::downgrade(&self.inner);
        Subscription {
            id,
            rx,
            detach: Some(Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().remove(id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

type Detach = Box<dyn FnOnce(u64) + Send + Sync>;

/// Receiving end of an [`Observable`] or [`Broadcaster`]
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    detach: Option<Detach>,
}

impl<T> Subscription<T> {
    /// Wait for the next value. Returns `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving values
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.detach_now();
    }
}

/// Search screen state derived from the hub
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchStatus {
    /// Still looking. `distance` is the nearest beacon's signal magnitude
    /// scaled to 0.0..=1.0, and 0.0 when nothing is in range.
    Searching { distance: f32 },
    /// A spot was just discovered
    SpotFound { spot_id: i64 },
}

impl SearchStatus {
    pub fn from_state(current_discovered_id: Option<i64>, nearest: Option<i32>) -> Self {
        match current_discovered_id {
            Some(spot_id) => SearchStatus::SpotFound { spot_id },
            None => {
                let strength = nearest.map(|s| s.unsigned_abs() as f32).unwrap_or(0.0);
                SearchStatus::Searching {
                    distance: (strength / MAX_SIGNAL_DISTANCE).clamp(0.0, 1.0),
                }
            }
        }
    }
}

/// Observable progress shared by the engine, UI and companion sync
pub struct StateHub {
    current_discovered_id: Observable<Option<i64>>,
    is_game_ended: Observable<bool>,
    proximity: Observable<Option<ProximityResult>>,
    cycles: Broadcaster<CycleSummary>,
}

impl StateHub {
    pub fn new() -> Self {
        Self {
            current_discovered_id: Observable::new(None),
            is_game_ended: Observable::new(false),
            proximity: Observable::new(None),
            cycles: Broadcaster::new(),
        }
    }

    pub fn current_discovered_id(&self) -> &Observable<Option<i64>> {
        &self.current_discovered_id
    }

    pub fn is_game_ended(&self) -> &Observable<bool> {
        &self.is_game_ended
    }

    pub fn proximity(&self) -> &Observable<Option<ProximityResult>> {
        &self.proximity
    }

    /// Subscribe to per-cycle summaries (no replay)
    pub fn on_cycle_complete(&self) -> Subscription<CycleSummary> {
        self.cycles.subscribe()
    }

    pub fn publish_proximity(&self, result: Option<ProximityResult>) {
        self.proximity.set(result);
    }

    /// Mirror the tracker's state into the observables
    pub fn publish_state(&self, state: &GameState) {
        self.current_discovered_id.set(state.current_discovered_id);
        self.is_game_ended.set(state.is_game_ended);
    }

    pub fn complete_cycle(&self, summary: CycleSummary) {
        tracing::debug!(?summary, "Cycle complete");
        self.cycles.publish(summary);
    }

    /// Current search screen state
    pub fn search_status(&self) -> SearchStatus {
        let nearest = self
            .proximity
            .get()
            .and_then(|p| p.nearest_signal_strength);
        SearchStatus::from_state(self.current_discovered_id.get(), nearest)
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport to the companion wearable
#[async_trait]
pub trait CompanionSync: Send + Sync {
    async fn send_data(&self, summary: CycleSummary) -> Result<()>;
}

/// Forward every cycle summary to the companion device until shutdown
pub fn spawn_companion_forwarder(
    hub: &StateHub,
    sync: Arc<dyn CompanionSync>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut summaries = hub.on_cycle_complete();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                summary = summaries.recv() => {
                    let Some(summary) = summary else { break };
                    if let Err(e) = sync.send_data(summary).await {
                        tracing::warn!(error = %e, "Failed to sync companion device");
                    }
                }
            }
        }
        tracing::debug!("Companion forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_subscribe_replays_current_value_first() {
        let obs = Observable::new(1);
        obs.set(2);

        let mut sub = obs.subscribe();
        assert_eq!(sub.recv().await, Some(2));

        obs.set(3);
        obs.set(4);
        assert_eq!(sub.recv().await, Some(3));
        assert_eq!(sub.recv().await, Some(4));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_change() {
        let obs = Observable::new(0);
        let mut a = obs.subscribe();
        let mut b = obs.subscribe();

        for v in 1..=50 {
            obs.set(v);
        }

        for sub in [&mut a, &mut b] {
            for expected in 0..=50 {
                assert_eq!(sub.recv().await, Some(expected));
            }
        }
    }

    #[test]
    fn test_set_same_value_does_not_notify() {
        let obs = Observable::new(false);
        let mut sub = obs.subscribe();
        assert_eq!(sub.try_recv(), Some(false));

        assert!(!obs.set(false));
        assert_eq!(sub.try_recv(), None);

        assert!(obs.set(true));
        assert_eq!(sub.try_recv(), Some(true));
    }

    #[test]
    fn test_unsubscribe_and_drop_detach() {
        let obs = Observable::new(0u8);
        let a = obs.subscribe();
        let b = obs.subscribe();
        assert_eq!(obs.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(obs.subscriber_count(), 1);

        drop(b);
        assert_eq!(obs.subscriber_count(), 0);
    }

    #[test]
    fn test_broadcaster_has_no_replay() {
        let cast = Broadcaster::new();
        cast.publish(1);
        let mut sub = cast.subscribe();
        assert_eq!(sub.try_recv(), None);
        cast.publish(2);
        assert_eq!(sub.try_recv(), Some(2));
    }

    #[test]
    fn test_search_status() {
        assert_eq!(
            SearchStatus::from_state(Some(4), Some(-20)),
            SearchStatus::SpotFound { spot_id: 4 }
        );
        assert_eq!(
            SearchStatus::from_state(None, None),
            SearchStatus::Searching { distance: 0.0 }
        );
        assert_eq!(
            SearchStatus::from_state(None, Some(-50)),
            SearchStatus::Searching { distance: 0.5 }
        );
        assert_eq!(
            SearchStatus::from_state(None, Some(-180)),
            SearchStatus::Searching { distance: 1.0 }
        );
    }

    #[test]
    fn test_hub_publish_state() {
        let hub = StateHub::new();
        let mut ended = hub.is_game_ended().subscribe();
        assert_eq!(ended.try_recv(), Some(false));

        hub.publish_state(&GameState {
            collected_ids: vec![1],
            current_discovered_id: Some(1),
            is_game_ended: true,
        });
        assert_eq!(ended.try_recv(), Some(true));
        assert_eq!(hub.current_discovered_id().get(), Some(1));
        assert_eq!(hub.search_status(), SearchStatus::SpotFound { spot_id: 1 });
    }

    struct RecordingSync {
        seen: Mutex<Vec<CycleSummary>>,
        fail: bool,
    }

    #[async_trait]
    impl CompanionSync for RecordingSync {
        async fn send_data(&self, summary: CycleSummary) -> Result<()> {
            self.seen.lock().push(summary);
            if self.fail {
                return Err(Error::Http("watch unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_companion_forwarder_delivers_and_survives_errors() {
        let hub = StateHub::new();
        let sync = Arc::new(RecordingSync {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_companion_forwarder(&hub, sync.clone(), shutdown.clone());

        let summary = CycleSummary {
            discovered_count: 2,
            nearest_signal_strength: Some(-70),
            current_discovered_id: Some(8),
            is_game_ended: false,
        };
        hub.complete_cycle(summary);
        hub.complete_cycle(CycleSummary {
            is_game_ended: true,
            ..summary
        });

        for _ in 0..100 {
            if sync.seen.lock().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sync.seen.lock().len(), 2);
        assert!(sync.seen.lock()[1].is_game_ended);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
