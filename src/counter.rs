//! Persistent tally counter shared by every overlay surface.
//!
//! Storage model:
//! - Primary and backup JSON snapshot files, both written atomically
//!   (write temp, rename).
//! - The backup is refreshed from the current value *before* every
//!   mutation touches the primary, so a crash mid-write loses at most
//!   the in-flight mutation.
//! - Load order at startup: primary first, backup if the primary is
//!   absent or corrupt (the corrupt file is renamed aside for
//!   debugging), zero if both are unusable.
//!
//! The store is read-mostly and single-writer: the lifecycle manager
//! only reads it when constructing content providers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

const COUNTER_SCHEMA_VERSION: u32 = 1;
const PRIMARY_FILE_NAME: &str = "counter.json";
const BACKUP_FILE_NAME: &str = "counter.backup.json";

/// Errors returned by counter persistence operations.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("counter serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk snapshot of the counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterSnapshot {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    value: i64,
    saved_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    COUNTER_SCHEMA_VERSION
}

/// Change notification sent to subscribers after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct CounterEvent {
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe persistent counter with change broadcasting.
pub struct CounterStore {
    primary_path: PathBuf,
    backup_path: PathBuf,
    value: RwLock<i64>,
    event_tx: broadcast::Sender<CounterEvent>,
}

impl CounterStore {
    /// Open a store rooted at the platform config directory.
    pub fn open_default(app_dir_name: &str) -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app_dir_name);
        Self::open(&dir)
    }

    /// Open a store rooted at `dir`, loading the persisted value through
    /// the primary/backup/zero fallback chain.
    pub fn open(dir: &Path) -> Self {
        let primary_path = dir.join(PRIMARY_FILE_NAME);
        let backup_path = dir.join(BACKUP_FILE_NAME);
        let value = load_value(&primary_path, &backup_path);

        let (event_tx, _) = broadcast::channel(16);
        Self {
            primary_path,
            backup_path,
            value: RwLock::new(value),
            event_tx,
        }
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        *self.value.read().expect("counter value lock poisoned")
    }

    /// Add one and persist. Returns the new value.
    pub fn increment(&self) -> Result<i64, CounterError> {
        self.apply(|value| value.saturating_add(1))
    }

    /// Subtract one and persist. Returns the new value.
    pub fn decrement(&self) -> Result<i64, CounterError> {
        self.apply(|value| value.saturating_sub(1))
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CounterEvent> {
        self.event_tx.subscribe()
    }

    fn apply(&self, mutate: impl FnOnce(i64) -> i64) -> Result<i64, CounterError> {
        let mut value = self.value.write().expect("counter value lock poisoned");

        // Backup first: the pre-mutation value survives a failed or
        // interrupted primary write.
        write_snapshot(&self.backup_path, *value)?;

        let next = mutate(*value);
        write_snapshot(&self.primary_path, next)?;
        *value = next;
        drop(value);

        let _ = self.event_tx.send(CounterEvent {
            value: next,
            timestamp: Utc::now(),
        });
        Ok(next)
    }
}

fn write_snapshot(path: &Path, value: i64) -> Result<(), CounterError> {
    let snapshot = CounterSnapshot {
        schema_version: COUNTER_SCHEMA_VERSION,
        value,
        saved_at: Utc::now(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(&snapshot)?;
    fs::write(&temp, &json)?;
    fs::rename(&temp, path)?;
    Ok(())
}

/// Load the persisted value: primary, then backup, then zero.
fn load_value(primary: &Path, backup: &Path) -> i64 {
    match read_snapshot(primary) {
        Ok(Some(snapshot)) => return snapshot.value,
        Ok(None) => {
            log::info!("No counter file found, trying backup");
        }
        Err(error) => {
            log::error!("Counter primary unreadable ({error}), trying backup");
            quarantine(primary);
        }
    }

    match read_snapshot(backup) {
        Ok(Some(snapshot)) => {
            log::warn!("Counter recovered from backup (value {})", snapshot.value);
            snapshot.value
        }
        Ok(None) => 0,
        Err(error) => {
            log::error!("Counter backup also unreadable ({error}), resetting to zero");
            quarantine(backup);
            0
        }
    }
}

fn read_snapshot(path: &Path) -> Result<Option<CounterSnapshot>, CounterError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let snapshot = serde_json::from_str::<CounterSnapshot>(&content)?;
            Ok(Some(snapshot))
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Rename an unreadable snapshot aside so it is kept for debugging
/// without poisoning the next load.
fn quarantine(path: &Path) {
    let aside = path.with_extension("json.corrupt");
    if let Err(error) = fs::rename(path, &aside) {
        log::warn!("Failed to set aside corrupt counter file: {error}");
    }
}
