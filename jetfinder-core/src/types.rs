//! Core domain types for jetfinder
//!
//! These types flow through one engine cycle:
//!
//! ```text
//! Sighting* ──aggregate──► AggregatedReport ──backend──► ProximityResult
//!                                                             │
//!                                 GameState ◄──reconcile──────┘
//!                                     │
//!                                     └──► CycleSummary (companion sync)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint;

/// One beacon reading reported by the radio scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Beacon identifier as advertised by the hardware
    pub identifier: String,
    /// Received signal strength (RSSI). Valid readings are negative.
    pub signal_strength: i32,
}

impl Sighting {
    pub fn new(identifier: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            identifier: identifier.into(),
            signal_strength,
        }
    }

    /// Returns true if the reading carries a usable signal strength
    pub fn is_valid(&self) -> bool {
        self.signal_strength < 0
    }
}

/// Stable 64-bit fingerprint of a beacon identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn of(identifier: &str) -> Self {
        Fingerprint(fingerprint::city_hash64(identifier.as_bytes()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// One entry of an aggregated report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportEntry {
    pub fingerprint: Fingerprint,
    pub signal_strength: i32,
}

/// Deduplicated batch of sightings ready to send to the backend
///
/// Holds at most one entry per beacon identifier, and only negative
/// signal strengths. Construct it through [`crate::aggregate::aggregate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregatedReport {
    entries: Vec<ReportEntry>,
}

impl AggregatedReport {
    pub(crate) fn from_entries(entries: Vec<ReportEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the report as the `beacons` query value:
    /// comma-separated `hash:strength` pairs.
    pub fn to_query_value(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}:{}", e.fingerprint, e.signal_strength))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Backend answer to a proximity report
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProximityResult {
    /// Spot ids the backend considers discovered, in backend order
    pub discovered_ids: Vec<i64>,
    /// Signal strength of the nearest beacon, if any is in range
    pub nearest_signal_strength: Option<i32>,
}

/// Game parameters fetched from the backend once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Number of spots needed to win
    pub winner_count: usize,
}

/// Progress state mutated once per successful cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameState {
    /// Spots recorded as found, in discovery order
    pub collected_ids: Vec<i64>,
    /// Most recently discovered spot, if announced this cycle
    pub current_discovered_id: Option<i64>,
    pub is_game_ended: bool,
}

/// Compact per-cycle summary pushed to the companion device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub discovered_count: usize,
    pub nearest_signal_strength: Option<i32>,
    pub current_discovered_id: Option<i64>,
    pub is_game_ended: bool,
}
