//! Per-vehicle window state.
//!
//! Entries live in a sharded concurrent map, so workers handling different
//! vehicles never contend on a store-wide lock. Sequential access for one
//! vehicle is the caller's job: the pipeline routes every event of a vin to
//! the same worker.

use super::window::{SpeedSample, WindowedHistory, DEFAULT_WINDOW_MS};
use super::DetectError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

const SNAPSHOT_VERSION: u32 = 1;

pub struct KeyedWindowStore {
    window_ms: i64,
    entries: DashMap<String, WindowedHistory>,
}

impl Default for KeyedWindowStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl KeyedWindowStore {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            entries: DashMap::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// History for `vin`; an empty one when the vin has not been seen.
    pub fn get(&self, vin: &str) -> WindowedHistory {
        self.entries
            .get(vin)
            .map(|h| h.clone())
            .unwrap_or_else(|| WindowedHistory::new(self.window_ms))
    }

    /// Replace the stored history for `vin`.
    pub fn put(&self, vin: &str, history: WindowedHistory) {
        self.entries.insert(vin.to_string(), history);
    }

    /// Run `f` against the vin's history in place, creating it on first use.
    ///
    /// Holds the shard lock for the duration of `f`; keep it short.
    pub fn with_history<R>(&self, vin: &str, f: impl FnOnce(&mut WindowedHistory) -> R) -> R {
        let mut entry = self
            .entries
            .entry(vin.to_string())
            .or_insert_with(|| WindowedHistory::new(self.window_ms));
        f(entry.value_mut())
    }

    pub fn remove(&self, vin: &str) -> Option<WindowedHistory> {
        self.entries.remove(vin).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of all histories. Entries are read shard by shard,
    /// so concurrent writers may or may not be reflected.
    pub fn snapshot(&self) -> WindowSnapshot {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .map(|e| SnapshotEntry {
                vin: e.key().clone(),
                samples: e.value().iter().copied().collect(),
            })
            .collect();
        entries.sort_by(|a, b| a.vin.cmp(&b.vin));

        WindowSnapshot {
            version: SNAPSHOT_VERSION,
            window_ms: self.window_ms,
            taken_at: chrono::Utc::now(),
            entries,
        }
    }

    /// Replace all state with `snapshot`. Samples are re-inserted under this
    /// store's window, so a snapshot taken with a wider window is trimmed.
    pub fn restore(&self, snapshot: WindowSnapshot) -> Result<usize, DetectError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DetectError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        self.entries.clear();
        let restored = snapshot.entries.len();
        for entry in snapshot.entries {
            let mut history = WindowedHistory::new(self.window_ms);
            for s in entry.samples {
                history.add_sample(s.timestamp, s.speed);
            }
            self.entries.insert(entry.vin, history);
        }
        Ok(restored)
    }
}

/// Serializable form of a [`KeyedWindowStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub version: u32,
    pub window_ms: i64,
    pub taken_at: chrono::DateTime<chrono::Utc>,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub vin: String,
    pub samples: Vec<SpeedSample>,
}
