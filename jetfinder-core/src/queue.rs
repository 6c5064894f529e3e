//! Buffer between the radio scanner and the engine
//!
//! The scanner pushes sightings from its own thread or task; the scheduler
//! drains everything once per tick. Both sides only hold the lock for a
//! `Vec` push or swap, so neither blocks on the other for long.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Sighting;

/// Unbounded, cloneable sighting buffer
///
/// Clones share the same buffer, so one clone can be handed to the scanner
/// and another kept by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SightingQueue {
    inner: Arc<Mutex<Vec<Sighting>>>,
}

impl SightingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a sighting. Never blocks on the consumer.
    pub fn push(&self, sighting: Sighting) {
        self.inner.lock().push(sighting);
    }

    /// Take every buffered sighting in arrival order, leaving the queue empty
    pub fn drain_all(&self) -> Vec<Sighting> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Number of sightings waiting for the next drain
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }
}
