//! The in-memory bucket store and its queries.
//!
//! Buckets are keyed by `(service_type, second)`, created lazily on the
//! first event in that second, and purged by the retention sweep.
//! Readers see committed buckets; an increment is observed entirely or
//! not at all, never torn.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use flotilla_core::{ALL_SERVICES, ResponseEvent, now_ms};

use crate::archive::EventArchive;

/// One second of observed responses for a service type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBucket {
    pub total: u64,
    /// Observed latencies, milliseconds. Insertion order carries no
    /// meaning for aggregation.
    pub durations: Vec<u64>,
}

/// Aggregated latency figures over a query range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

/// Result of an aggregated range query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub total: u64,
    pub duration: DurationStats,
}

/// Process-wide stats store, mutated only by `record` and the sweep.
pub struct StatsAggregator {
    /// service type → second → bucket.
    buckets: RwLock<HashMap<String, BTreeMap<u64, StatBucket>>>,
    retention: Duration,
}

impl StatsAggregator {
    pub fn new(retention: Duration) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Fold one event into its second bucket and the `"all"` mirror.
    /// Side effect only; never fails the caller.
    pub fn record(&self, event: &ResponseEvent) {
        let second = event.timestamp_ms / 1000;
        let mut buckets = self.buckets.write().expect("stats lock");

        for service_type in [ALL_SERVICES, event.service.service_type.as_str()] {
            let bucket = buckets
                .entry(service_type.to_string())
                .or_default()
                .entry(second)
                .or_default();
            bucket.total += 1;
            bucket.durations.push(event.duration_ms);
        }
    }

    /// Aggregate every retained bucket at or after `since_ms`.
    ///
    /// All duration fields are absent when no samples exist in range;
    /// the average is never a division by zero.
    pub fn query_range(&self, service_type: &str, since_ms: u64) -> RangeStats {
        let since_second = since_ms / 1000;
        let buckets = self.buckets.read().expect("stats lock");

        let mut stats = RangeStats::default();
        let mut sum: u64 = 0;
        let mut count: u64 = 0;

        if let Some(per_second) = buckets.get(service_type) {
            for (_, bucket) in per_second.range(since_second..) {
                stats.total += bucket.total;
                for &duration in &bucket.durations {
                    stats.duration.min = Some(stats.duration.min.map_or(duration, |m| m.min(duration)));
                    stats.duration.max = Some(stats.duration.max.map_or(duration, |m| m.max(duration)));
                    sum += duration;
                    count += 1;
                }
            }
        }

        if count > 0 {
            stats.duration.average = Some(sum as f64 / count as f64);
        }
        stats
    }

    /// Same filter as `query_range`, unaggregated, keyed by second.
    pub fn query_range_segregated(
        &self,
        service_type: &str,
        since_ms: u64,
    ) -> BTreeMap<u64, StatBucket> {
        let since_second = since_ms / 1000;
        let buckets = self.buckets.read().expect("stats lock");

        buckets
            .get(service_type)
            .map(|per_second| {
                per_second
                    .range(since_second..)
                    .map(|(second, bucket)| (*second, bucket.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every bucket older than the retention horizon.
    pub fn sweep(&self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.retention.as_millis() as u64) / 1000;
        let mut buckets = self.buckets.write().expect("stats lock");

        let mut removed = 0usize;
        for per_second in buckets.values_mut() {
            let before = per_second.len();
            per_second.retain(|&second, _| second > cutoff);
            removed += before - per_second.len();
        }
        buckets.retain(|_, per_second| !per_second.is_empty());

        debug!(removed, cutoff_second = cutoff, "retention sweep complete");
    }

    /// Replay archived events into the bucket store. Called once on
    /// startup, before live ingestion, so a restarted aggregator does
    /// not report an empty window.
    pub async fn backfill(&self, archive: &dyn EventArchive) -> crate::ArchiveResult<usize> {
        let since = now_ms().saturating_sub(self.retention.as_millis() as u64);
        let events = archive.events_since(since).await?;
        let replayed = events.len();
        for event in &events {
            self.record(event);
        }
        info!(replayed, "stats backfill complete");
        Ok(replayed)
    }

    /// Retention sweep loop. The period equals the retention horizon,
    /// which bounds memory to one horizon of stale buckets at worst.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            retention_secs = self.retention.as_secs(),
            "retention sweeper started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.retention) => {
                    self.sweep(now_ms());
                }
                _ = shutdown.changed() => {
                    info!("retention sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::ServiceRef;

    fn event(service_type: &str, timestamp_ms: u64, duration_ms: u64) -> ResponseEvent {
        ResponseEvent {
            url: format!("/{service_type}/1"),
            timestamp_ms,
            duration_ms,
            service: ServiceRef {
                name: format!("{service_type}-6101"),
                service_type: service_type.to_string(),
            },
        }
    }

    #[test]
    fn record_then_query_covers_the_window() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t, 120));

        let range = stats.query_range("prime-number", t - 1000);
        assert!(range.total >= 1);
        assert!(range.duration.max.unwrap() >= 120);
    }

    #[test]
    fn strictly_future_window_is_empty_with_absent_durations() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t, 120));

        let range = stats.query_range("prime-number", t + 1000);
        assert_eq!(range.total, 0);
        assert_eq!(range.duration.min, None);
        assert_eq!(range.duration.max, None);
        assert_eq!(range.duration.average, None);
    }

    #[test]
    fn min_max_average_aggregate_across_buckets() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t, 100));
        stats.record(&event("prime-number", t + 1500, 300));
        stats.record(&event("prime-number", t + 2500, 200));

        let range = stats.query_range("prime-number", t);
        assert_eq!(range.total, 3);
        assert_eq!(range.duration.min, Some(100));
        assert_eq!(range.duration.max, Some(300));
        assert_eq!(range.duration.average, Some(200.0));
    }

    #[test]
    fn events_mirror_into_the_all_type() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t, 100));
        stats.record(&event("random-string", t, 50));

        let all = stats.query_range(ALL_SERVICES, t - 1000);
        assert_eq!(all.total, 2);
        assert_eq!(all.duration.min, Some(50));
        assert_eq!(all.duration.max, Some(100));
    }

    #[test]
    fn segregated_query_keys_by_second() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t, 100));
        stats.record(&event("prime-number", t + 250, 150));
        stats.record(&event("prime-number", t + 1250, 300));

        let segregated = stats.query_range_segregated("prime-number", t);
        assert_eq!(segregated.len(), 2);
        assert_eq!(segregated[&(t / 1000)].total, 2);
        assert_eq!(segregated[&(t / 1000 + 1)].durations, [300]);

        // The filter applies to segregated queries too.
        let later = stats.query_range_segregated("prime-number", t + 1000);
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn unknown_type_queries_are_empty() {
        let stats = StatsAggregator::new(Duration::from_secs(3600));
        assert_eq!(stats.query_range("ghost", 0).total, 0);
        assert!(stats.query_range_segregated("ghost", 0).is_empty());
    }

    #[test]
    fn sweep_purges_buckets_past_the_horizon() {
        let stats = StatsAggregator::new(Duration::from_secs(60));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t - 120_000, 100)); // two minutes old
        stats.record(&event("prime-number", t, 200));

        stats.sweep(t);

        let range = stats.query_range("prime-number", 0);
        assert_eq!(range.total, 1);
        assert_eq!(range.duration.max, Some(200));

        // The "all" mirror is swept on the same horizon.
        assert_eq!(stats.query_range(ALL_SERVICES, 0).total, 1);
    }

    #[test]
    fn sweep_drops_types_with_no_remaining_buckets() {
        let stats = StatsAggregator::new(Duration::from_secs(60));
        let t = 1_700_000_000_000u64;
        stats.record(&event("prime-number", t - 120_000, 100));

        stats.sweep(t);
        assert!(stats.query_range_segregated("prime-number", 0).is_empty());
    }
}
