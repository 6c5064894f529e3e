//! JSON payloads returned by the game backend

use serde::Deserialize;

use crate::types::{GameConfig, ProximityResult};

/// Response from GET config
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub winner_count: usize,
}

impl From<ConfigResponse> for GameConfig {
    fn from(r: ConfigResponse) -> Self {
        GameConfig {
            winner_count: r.winner_count,
        }
    }
}

/// Response from GET proximity
///
/// Older backends use `discoveredBeaconsIds` / `nearestBeaconStrength`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityResponse {
    #[serde(default, alias = "discoveredBeaconsIds")]
    pub discovered_ids: Vec<i64>,
    #[serde(default, alias = "nearestBeaconStrength")]
    pub nearest_signal_strength: Option<i32>,
}

impl From<ProximityResponse> for ProximityResult {
    fn from(r: ProximityResponse) -> Self {
        ProximityResult {
            discovered_ids: r.discovered_ids,
            nearest_signal_strength: r.nearest_signal_strength,
        }
    }
}

/// Response from GET register
#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub message: Option<String>,
}
