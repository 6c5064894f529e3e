//! Game progress reconciliation
//!
//! [`ProgressTracker`] owns the [`GameState`] and folds each proximity result
//! into it. It also owns the [`GameConfig`]; reconciliation refuses to run
//! until one has been installed.
//!
//! Two rules deserve a note:
//! - The first successful reconciliation after process start never announces
//!   a discovered spot. Spots found in an earlier session would otherwise be
//!   announced again on launch.
//! - The collected set is merged according to [`CollectedPolicy`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::storage::CollectedSpotsStore;
use crate::types::{GameConfig, GameState, ProximityResult};

/// How discovered ids are merged into the collected set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectedPolicy {
    /// Collected ids only ever grow; new ids are appended in result order
    #[default]
    Union,
    /// Collected ids become exactly the latest discovered ids
    Replace,
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Discovered ids that were not collected before, in result order
    pub new_ids: Vec<i64>,
    /// True when this was the first reconciliation and announcing was suppressed
    pub suppressed: bool,
    /// Size of the backend's discovered set
    pub discovered_count: usize,
    /// State after the transition
    pub state: GameState,
}

struct TrackerState {
    game: GameState,
    first_run: bool,
}

/// Reconciles proximity results against collected progress
pub struct ProgressTracker {
    config: RwLock<Option<GameConfig>>,
    state: Mutex<TrackerState>,
    policy: CollectedPolicy,
    spots: Arc<dyn CollectedSpotsStore>,
}

impl ProgressTracker {
    /// Create a tracker, restoring collected spots from storage
    pub fn new(spots: Arc<dyn CollectedSpotsStore>, policy: CollectedPolicy) -> Result<Self> {
        let collected_ids = spots.collected_spot_ids()?;
        tracing::debug!(?collected_ids, ?policy, "Restored collected spots");

        Ok(Self {
            config: RwLock::new(None),
            state: Mutex::new(TrackerState {
                game: GameState {
                    collected_ids,
                    ..GameState::default()
                },
                first_run: true,
            }),
            policy,
            spots,
        })
    }

    /// Create a tracker with its game config already known
    pub fn with_config(
        spots: Arc<dyn CollectedSpotsStore>,
        policy: CollectedPolicy,
        config: GameConfig,
    ) -> Result<Self> {
        let tracker = Self::new(spots, policy)?;
        tracker.set_config(config);
        Ok(tracker)
    }

    /// Install or replace the game config
    pub fn set_config(&self, config: GameConfig) {
        *self.config.write() = Some(config);
    }

    pub fn config(&self) -> Option<GameConfig> {
        *self.config.read()
    }

    pub fn policy(&self) -> CollectedPolicy {
        self.policy
    }

    /// Snapshot of the current state
    pub fn state(&self) -> GameState {
        self.state.lock().game.clone()
    }

    pub fn is_game_ended(&self) -> bool {
        self.state.lock().game.is_game_ended
    }

    /// Fold one proximity result into the game state
    ///
    /// Fails with [`Error::GameConfigMissing`] without touching state when
    /// no config has been installed. The new collected ids are persisted
    /// before they are committed in memory; if storage fails the error is
    /// returned and the state (first-run flag included) is left as it was.
    pub fn reconcile(&self, result: &ProximityResult) -> Result<Reconciliation> {
        let config = self.config().ok_or(Error::GameConfigMissing)?;

        let mut guard = self.state.lock();
        let TrackerState { game, first_run } = &mut *guard;

        let previous: HashSet<i64> = game.collected_ids.iter().copied().collect();
        let mut seen = HashSet::new();
        let new_ids: Vec<i64> = result
            .discovered_ids
            .iter()
            .copied()
            .filter(|id| !previous.contains(id) && seen.insert(*id))
            .collect();

        tracing::debug!(
            collected = ?game.collected_ids,
            discovered = ?result.discovered_ids,
            new = ?new_ids,
            "Reconciling proximity result"
        );

        let collected_ids = match self.policy {
            CollectedPolicy::Union => {
                let mut merged = game.collected_ids.clone();
                merged.extend(new_ids.iter().copied());
                merged
            }
            CollectedPolicy::Replace => {
                let mut seen = HashSet::new();
                result
                    .discovered_ids
                    .iter()
                    .copied()
                    .filter(|id| seen.insert(*id))
                    .collect()
            }
        };

        if let Err(e) = self.spots.set_collected_spot_ids(&collected_ids) {
            tracing::warn!(error = %e, "Failed to persist collected spots");
            return Err(e);
        }

        let suppressed = *first_run;
        if suppressed {
            *first_run = false;
        } else {
            game.current_discovered_id = new_ids.first().copied();
        }
        game.is_game_ended = collected_ids.len() == config.winner_count;
        game.collected_ids = collected_ids;

        Ok(Reconciliation {
            new_ids,
            suppressed,
            discovered_count: result.discovered_ids.len(),
            state: game.clone(),
        })
    }

    /// Forget all progress for a fresh game
    ///
    /// Collected spots are cleared in storage too. The first-run flag is left
    /// alone: spots found after a reset are genuinely new.
    pub fn reset(&self) -> Result<()> {
        let mut guard = self.state.lock();
        self.spots.set_collected_spot_ids(&[])?;
        guard.game = GameState::default();
        Ok(())
    }
}
