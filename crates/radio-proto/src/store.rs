//! Station persistence.
//!
//! `StationStore` owns the station list and writes the whole list through to a
//! `KeyValueStore` after every mutation.  Reads fail open: anything missing or
//! unparsable under the key yields the built-in seed list.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::station::{default_stations, StationRecord};

/// Versioned key the station list lives under.  Bump the suffix when the
/// record shape changes incompatibly; old values are then simply ignored.
pub const STATIONS_KEY: &str = "homepage_radio_v3";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("a station with id '{0}' already exists")]
    DuplicateId(String),
    #[error("station id must not be empty")]
    EmptyId,
}

/// Durable string-to-string storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

// ── FileStore ─────────────────────────────────────────────────────────────────

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    values: std::collections::HashMap<String, String>,
    writes: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory store.  Clones share the same contents, so a test can keep one
/// clone to inspect what the `StationStore` wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::new();
        store.lock().values.insert(key.to_string(), value.to_string());
        store
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    /// Make every following `set` fail, as a full or read-only disk would.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make every following `get` fail, as an unreadable disk would.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let inner = self.lock();
        if inner.fail_reads {
            anyhow::bail!("memory store is unreadable");
        }
        Ok(inner.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            anyhow::bail!("memory store is read-only");
        }
        inner.values.insert(key.to_string(), value.to_string());
        inner.writes += 1;
        Ok(())
    }
}

// ── StationStore ──────────────────────────────────────────────────────────────

pub struct StationStore<S> {
    stations: Vec<StationRecord>,
    backend: S,
}

impl<S: KeyValueStore> StationStore<S> {
    /// Load the persisted list, or the seed list when there is none.
    pub fn load(backend: S) -> Self {
        let stations = match backend.get(STATIONS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<StationRecord>>(&raw) {
                Ok(stations) => {
                    info!("Loaded {} stations from '{}'", stations.len(), STATIONS_KEY);
                    dedup_ids(stations)
                }
                Err(e) => {
                    warn!("Stored stations under '{}' unreadable ({}), using defaults", STATIONS_KEY, e);
                    default_stations()
                }
            },
            Ok(None) => {
                info!("No stored stations, using defaults");
                default_stations()
            }
            Err(e) => {
                warn!("Failed to read '{}' ({}), using defaults", STATIONS_KEY, e);
                default_stations()
            }
        };

        Self { stations, backend }
    }

    pub fn stations(&self) -> &[StationRecord] {
        &self.stations
    }

    pub fn get(&self, id: &str) -> Option<&StationRecord> {
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Append a station.  The caller mints the id; a clash is refused and
    /// nothing is written.
    pub fn add(&mut self, record: StationRecord) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        if self.contains(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        debug!("store: add '{}' ({})", record.name, record.id);
        self.stations.push(record);
        self.persist();
        Ok(())
    }

    /// Replace the station with the same id in place and hand back the old
    /// version.  An unknown id changes nothing but is still written.
    pub fn update(&mut self, record: StationRecord) -> Option<StationRecord> {
        let previous = match self.stations.iter_mut().find(|s| s.id == record.id) {
            Some(slot) => {
                debug!("store: update '{}' ({})", record.name, record.id);
                Some(std::mem::replace(slot, record))
            }
            None => {
                debug!("store: update for unknown id '{}' ignored", record.id);
                None
            }
        };
        self.persist();
        previous
    }

    /// Drop the station with `id`, if present.  Always written.
    pub fn remove(&mut self, id: &str) -> Option<StationRecord> {
        let removed = self
            .stations
            .iter()
            .position(|s| s.id == id)
            .map(|idx| self.stations.remove(idx));
        if removed.is_some() {
            debug!("store: removed '{}'", id);
        }
        self.persist();
        removed
    }

    fn persist(&mut self) {
        let json = match serde_json::to_string(&self.stations) {
            Ok(json) => json,
            Err(e) => {
                warn!("store: failed to serialise stations: {}", e);
                return;
            }
        };
        // The in-memory list stays authoritative when the disk copy lags.
        if let Err(e) = self.backend.set(STATIONS_KEY, &json) {
            warn!("store: failed to persist stations: {}", e);
        }
    }
}

fn dedup_ids(stations: Vec<StationRecord>) -> Vec<StationRecord> {
    let mut seen = HashSet::new();
    let before = stations.len();
    let kept: Vec<StationRecord> = stations
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect();
    if kept.len() != before {
        warn!("Dropped {} stored stations with duplicate ids", before - kept.len());
    }
    kept
}
