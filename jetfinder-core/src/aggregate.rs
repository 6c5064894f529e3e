//! Sighting aggregation
//!
//! Turns one drained batch into the report sent to the backend:
//! invalid readings are dropped and each beacon keeps only its latest reading.

use std::collections::HashSet;

use crate::types::{AggregatedReport, Fingerprint, ReportEntry, Sighting};

/// Build a report from one drained batch
///
/// Returns `None` when no valid sighting remains, in which case the cycle
/// skips the network call. Entries appear in reverse arrival order of each
/// beacon's latest reading.
pub fn aggregate(batch: &[Sighting]) -> Option<AggregatedReport> {
    let mut seen: HashSet<&str> = HashSet::new();
    let entries: Vec<ReportEntry> = batch
        .iter()
        .rev()
        .filter(|s| s.is_valid())
        .filter(|s| seen.insert(s.identifier.as_str()))
        .map(|s| ReportEntry {
            fingerprint: Fingerprint::of(&s.identifier),
            signal_strength: s.signal_strength,
        })
        .collect();

    if entries.is_empty() {
        tracing::debug!(batch_len = batch.len(), "All sightings filtered out");
        return None;
    }

    Some(AggregatedReport::from_entries(entries))
}
