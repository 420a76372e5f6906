//! Durable event archive backed by redb.
//!
//! An append-only table of response events keyed by
//! `{timestamp_ms:013}:{seq:06}` — zero-padded so lexicographic key
//! order is chronological order and range replay is a single scan.
//! Values are the JSON-serialized events.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::debug;

use flotilla_core::ResponseEvent;

/// Archived events keyed by `{timestamp_ms:013}:{seq:06}`.
const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that can occur during archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Convert any `Display` error into an `ArchiveError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| ArchiveError::$variant(e.to_string())
    };
}

/// The durable store of response events, replayable by time range.
#[async_trait]
pub trait EventArchive: Send + Sync {
    /// Append one event.
    async fn append(&self, event: &ResponseEvent) -> ArchiveResult<()>;

    /// Every archived event with `timestamp_ms >= since_ms`, in
    /// chronological order.
    async fn events_since(&self, since_ms: u64) -> ArchiveResult<Vec<ResponseEvent>>;
}

/// redb-backed archive, usable on disk or in memory.
#[derive(Clone)]
pub struct RedbArchive {
    db: Arc<Database>,
    /// Disambiguates events landing on the same millisecond.
    seq: Arc<AtomicU64>,
}

impl RedbArchive {
    /// Open (or create) a persistent archive at the given path.
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let archive = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        };
        archive.ensure_table()?;
        debug!(?path, "event archive opened");
        Ok(archive)
    }

    /// Create an ephemeral in-memory archive (for testing).
    pub fn open_in_memory() -> ArchiveResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let archive = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        };
        archive.ensure_table()?;
        Ok(archive)
    }

    fn ensure_table(&self) -> ArchiveResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn key(timestamp_ms: u64, seq: u64) -> String {
        format!("{timestamp_ms:013}:{seq:06}")
    }
}

#[async_trait]
impl EventArchive for RedbArchive {
    async fn append(&self, event: &ResponseEvent) -> ArchiveResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = Self::key(event.timestamp_ms, seq);
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    async fn events_since(&self, since_ms: u64) -> ArchiveResult<Vec<ResponseEvent>> {
        let from = Self::key(since_ms, 0);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;

        let mut events = Vec::new();
        for entry in table.range(from.as_str()..).map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ResponseEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::ServiceRef;

    fn event(timestamp_ms: u64, duration_ms: u64) -> ResponseEvent {
        ResponseEvent {
            url: "/prime-number/7".to_string(),
            timestamp_ms,
            duration_ms,
            service: ServiceRef {
                name: "prime-number-6101".to_string(),
                service_type: "prime-number".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn append_and_replay_in_chronological_order() {
        let archive = RedbArchive::open_in_memory().unwrap();
        archive.append(&event(3000, 30)).await.unwrap();
        archive.append(&event(1000, 10)).await.unwrap();
        archive.append(&event(2000, 20)).await.unwrap();

        let events = archive.events_since(0).await.unwrap();
        let durations: Vec<u64> = events.iter().map(|e| e.duration_ms).collect();
        assert_eq!(durations, [10, 20, 30]);
    }

    #[tokio::test]
    async fn events_since_excludes_older_entries() {
        let archive = RedbArchive::open_in_memory().unwrap();
        archive.append(&event(1000, 10)).await.unwrap();
        archive.append(&event(5000, 50)).await.unwrap();

        let events = archive.events_since(2000).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_ms, 50);
    }

    #[tokio::test]
    async fn same_millisecond_events_are_all_kept() {
        let archive = RedbArchive::open_in_memory().unwrap();
        archive.append(&event(1000, 1)).await.unwrap();
        archive.append(&event(1000, 2)).await.unwrap();
        archive.append(&event(1000, 3)).await.unwrap();

        assert_eq!(archive.events_since(1000).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn persistent_archive_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.redb");

        {
            let archive = RedbArchive::open(&path).unwrap();
            archive.append(&event(1000, 10)).await.unwrap();
        }

        let archive = RedbArchive::open(&path).unwrap();
        assert_eq!(archive.events_since(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backfill_replays_archive_into_aggregator() {
        use crate::StatsAggregator;
        use std::time::Duration;

        let archive = RedbArchive::open_in_memory().unwrap();
        let now = flotilla_core::now_ms();
        archive.append(&event(now - 5000, 42)).await.unwrap();
        archive.append(&event(now - 2000, 84)).await.unwrap();

        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let replayed = stats.backfill(&archive).await.unwrap();
        assert_eq!(replayed, 2);

        let range = stats.query_range("prime-number", now - 10_000);
        assert_eq!(range.total, 2);
        assert_eq!(range.duration.max, Some(84));
    }
}
