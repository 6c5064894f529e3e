//! # jetfinder-core
//!
//! Client engine for the jetfinder beacon scavenger hunt.
//!
//! This library provides:
//! - Sighting buffering and aggregation into backend reports
//! - The game backend client
//! - Progress reconciliation and observable game state
//! - The periodic scheduler tying them together
//! - Storage, configuration and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! scanner ─► SightingQueue ─► Scheduler (every interval)
//!                                 │ aggregate
//!                                 ▼
//!                          ProximityClient ─► ProgressTracker ─► StateHub
//!                                                                  │
//!                                              UI observers ◄──────┤
//!                                              companion sync ◄────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jetfinder_core::{Config, GameSession, HttpGameApi, SessionStores, Sighting, Store};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> jetfinder_core::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(Store::open(&Config::database_path())?);
//! store.migrate()?;
//!
//! let api = Arc::new(HttpGameApi::new(&config.backend, store.clone(), store.clone())?);
//! let session = GameSession::new(api, SessionStores::shared(store), config.engine.clone())?;
//! session.load_game_config().await?;
//!
//! let shutdown = CancellationToken::new();
//! let engine = session.start(shutdown.clone())?;
//! session.sightings().push(Sighting::new("beacon-1", -62));
//! # shutdown.cancel();
//! # let _ = engine.await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use api::{GameApi, HttpGameApi, ProximityClient};
pub use config::Config;
pub use error::{Error, Result};
pub use game::{GameSession, SessionStores};
pub use hub::{CompanionSync, Observable, SearchStatus, StateHub, Subscription};
pub use progress::{CollectedPolicy, ProgressTracker};
pub use queue::SightingQueue;
pub use scheduler::Scheduler;
pub use storage::Store;
pub use types::*;

// Public modules
pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod game;
pub mod hub;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod types;
