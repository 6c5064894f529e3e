//! Game backend API
//!
//! The engine only needs [`ProximityClient`]; session setup (config loading,
//! winner registration) goes through the wider [`GameApi`].
//!
//! ## Endpoints
//!
//! All endpoints are `GET` requests relative to `backend.base_url`:
//!
//! | path       | query                           | response           |
//! |------------|---------------------------------|--------------------|
//! | `config`   |                                 | `{winnerCount}`    |
//! | `proximity`| `beacons=<hash:strength,...>`   | `{discoveredIds, nearestSignalStrength}` |
//! | `register` | `name=<winner name>`            | `{message}`        |

mod client;
mod wire;

pub use client::HttpGameApi;
pub use wire::{ConfigResponse, ProximityResponse, RegisterResponse};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AggregatedReport, GameConfig, ProximityResult};

/// Performs the per-cycle proximity round trip
#[async_trait]
pub trait ProximityClient: Send + Sync {
    /// Send one aggregated report and return the backend's view of progress.
    ///
    /// Any transport or decode failure is an error; callers do not retry.
    async fn report(&self, report: &AggregatedReport) -> Result<ProximityResult>;
}

/// Full backend surface used by a game session
#[async_trait]
pub trait GameApi: ProximityClient {
    async fn game_config(&self) -> Result<GameConfig>;

    /// Register the winner's name. Returns the backend's message, if any.
    async fn register(&self, name: &str) -> Result<Option<String>>;
}
