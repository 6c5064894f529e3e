//! Game session facade
//!
//! [`GameSession`] wires the engine together and exposes the operations a
//! client app needs around it: loading the game config, registering the
//! winner, resetting for a fresh game, and starting the polling loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{GameApi, ProximityClient};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::hub::StateHub;
use crate::progress::ProgressTracker;
use crate::queue::SightingQueue;
use crate::scheduler::Scheduler;
use crate::storage::{CollectedSpotsStore, CookieJar, KeyValueStorage};
use crate::types::{GameConfig, GameState};

/// Storage collaborators a session needs
#[derive(Clone)]
pub struct SessionStores {
    pub settings: Arc<dyn KeyValueStorage>,
    pub cookies: Arc<dyn CookieJar>,
    pub spots: Arc<dyn CollectedSpotsStore>,
}

impl SessionStores {
    /// Use one backing store for all three roles
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: KeyValueStorage + CookieJar + CollectedSpotsStore + 'static,
    {
        Self {
            settings: store.clone(),
            cookies: store.clone(),
            spots: store,
        }
    }
}

/// One player's game on this device
pub struct GameSession {
    api: Arc<dyn GameApi>,
    proximity: Arc<dyn ProximityClient>,
    stores: SessionStores,
    tracker: Arc<ProgressTracker>,
    hub: Arc<StateHub>,
    queue: SightingQueue,
    engine: EngineConfig,
}

impl GameSession {
    /// Create a session, restoring collected spots from storage
    pub fn new<A>(api: Arc<A>, stores: SessionStores, engine: EngineConfig) -> Result<Self>
    where
        A: GameApi + 'static,
    {
        engine.validate()?;
        let tracker = Arc::new(ProgressTracker::new(
            stores.spots.clone(),
            engine.collected_policy,
        )?);

        Ok(Self {
            api: api.clone(),
            proximity: api,
            stores,
            tracker,
            hub: Arc::new(StateHub::new()),
            queue: SightingQueue::new(),
            engine,
        })
    }

    /// Handle for the scanner to push sightings into
    pub fn sightings(&self) -> SightingQueue {
        self.queue.clone()
    }

    pub fn hub(&self) -> Arc<StateHub> {
        Arc::clone(&self.hub)
    }

    pub fn state(&self) -> GameState {
        self.tracker.state()
    }

    pub fn game_config(&self) -> Option<GameConfig> {
        self.tracker.config()
    }

    /// Fetch the game config and hand it to the progress tracker
    pub async fn load_game_config(&self) -> Result<GameConfig> {
        let config = self.api.game_config().await?;
        tracing::info!(winner_count = config.winner_count, "Game config loaded");
        self.tracker.set_config(config);
        Ok(config)
    }

    /// Store the winner's name and register it with the backend
    ///
    /// Errors are returned to the caller; this is a user action, not part
    /// of the polling loop.
    pub async fn send_winner_name(&self, name: &str) -> Result<Option<String>> {
        self.stores.settings.set_winner_name(name)?;
        let message = self.api.register(name).await?;
        tracing::info!(?message, "Winner registered");
        Ok(message)
    }

    pub fn winner_name(&self) -> Result<Option<String>> {
        self.stores.settings.winner_name()
    }

    pub fn is_user_registered(&self) -> Result<bool> {
        self.stores.settings.is_user_registered()
    }

    pub fn set_user_registered(&self, registered: bool) -> Result<()> {
        self.stores.settings.set_user_registered(registered)
    }

    /// Current session cookie, if any
    pub fn cookie(&self) -> Result<Option<String>> {
        self.stores.cookies.last_cookie()
    }

    /// Start over with a fresh backend identity
    ///
    /// Clears stored cookies, unregisters the user, bans the current cookie
    /// and empties the collected spots. The hub is reset too so observers
    /// leave the game-ended state.
    pub fn reset_cookies(&self) -> Result<()> {
        self.stores.settings.set_cookies(None)?;
        self.stores.settings.set_user_registered(false)?;
        self.stores.cookies.ban_cookie()?;
        self.tracker.reset()?;
        self.hub.publish_state(&self.tracker.state());

        tracing::info!("Cookies cleared");
        Ok(())
    }

    /// Spawn the polling loop. Cancel `shutdown` to stop it.
    pub fn start(&self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        if self.tracker.config().is_none() {
            tracing::warn!("Starting before game config is loaded; cycles will not reconcile");
        }

        // Observers start from the restored state
        self.hub.publish_state(&self.tracker.state());

        let scheduler = Scheduler::new(
            self.queue.clone(),
            self.proximity.clone(),
            self.tracker.clone(),
            self.hub.clone(),
            &self.engine,
        )?;
        Ok(tokio::spawn(scheduler.run(shutdown)))
    }
}
