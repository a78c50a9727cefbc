//! Sliding-window tracking of authentication failures per source.
//!
//! Only signature-validation failures are recorded here; storage and
//! correlation outcomes never are. When a source crosses the configured
//! failure threshold inside the window an alert is emitted, once per
//! upward crossing; it re-arms when the in-window count falls back below
//! the threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Hard cap on distinct tracked sources, so spoofed source identities
/// cannot grow the map without bound.
const MAX_TRACKED_SOURCES: usize = 10_000;

#[derive(Debug)]
struct SourceRecord {
    failures: VecDeque<DateTime<Utc>>,
    alerted: bool,
    last_seen: DateTime<Utc>,
}

/// Per-source snapshot from [`AnomalyMonitor::stats`].
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub source: String,
    pub failures_in_window: usize,
}

/// Shared failure tracker. One instance is constructed at process start
/// and handed to every request path; tests build their own.
#[derive(Debug)]
pub struct AnomalyMonitor {
    threshold: usize,
    window: Duration,
    sources: Mutex<HashMap<String, SourceRecord>>,
    alerts_emitted: AtomicU64,
}

impl AnomalyMonitor {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            sources: Mutex::new(HashMap::new()),
            alerts_emitted: AtomicU64::new(0),
        }
    }

    /// Record an authentication failure for `source` at `now`.
    ///
    /// Returns true when this failure crossed the threshold and emitted
    /// an alert. Callers invoke this exactly once per physical request,
    /// so retries of one request are never double-counted.
    pub fn record(&self, source: &str, now: DateTime<Utc>) -> bool {
        let mut sources = lock(&self.sources);

        if !sources.contains_key(source) && sources.len() >= MAX_TRACKED_SOURCES {
            Self::evict(&mut sources, self.window, now);
        }

        let record = sources.entry(source.to_string()).or_insert_with(|| SourceRecord {
            failures: VecDeque::new(),
            alerted: false,
            last_seen: now,
        });

        prune(&mut record.failures, self.window, now);
        record.failures.push_back(now);
        record.last_seen = now;

        let count = record.failures.len();
        if count >= self.threshold {
            if !record.alerted {
                record.alerted = true;
                self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Anomaly detected: {} validation failures from {} in {}s",
                    count,
                    source,
                    self.window.as_secs()
                );
                return true;
            }
        } else {
            // Below threshold again after window slide; re-arm.
            record.alerted = false;
        }

        false
    }

    /// Failures recorded for `source` within the window ending at `now`.
    /// Entries older than the window are purged as a side effect.
    pub fn count(&self, source: &str, now: DateTime<Utc>) -> usize {
        let mut sources = lock(&self.sources);
        match sources.get_mut(source) {
            Some(record) => {
                prune(&mut record.failures, self.window, now);
                record.failures.len()
            }
            None => 0,
        }
    }

    /// Total alerts emitted since construction.
    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    /// In-window failure counts for every tracked source.
    pub fn stats(&self, now: DateTime<Utc>) -> Vec<SourceStats> {
        let mut sources = lock(&self.sources);
        sources
            .iter_mut()
            .map(|(source, record)| {
                prune(&mut record.failures, self.window, now);
                SourceStats {
                    source: source.clone(),
                    failures_in_window: record.failures.len(),
                }
            })
            .collect()
    }

    /// Drop sources with no in-window failures; if the map is still at
    /// capacity, evict the longest-idle source.
    fn evict(sources: &mut HashMap<String, SourceRecord>, window: Duration, now: DateTime<Utc>) {
        sources.retain(|_, record| {
            prune(&mut record.failures, window, now);
            !record.failures.is_empty()
        });

        if sources.len() >= MAX_TRACKED_SOURCES {
            if let Some(oldest) = sources
                .iter()
                .min_by_key(|(_, record)| record.last_seen)
                .map(|(source, _)| source.clone())
            {
                sources.remove(&oldest);
            }
        }
    }
}

fn prune(failures: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    while let Some(front) = failures.front() {
        if now.signed_duration_since(*front) > window {
            failures.pop_front();
        } else {
            break;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(unix: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(unix, 0).unwrap()
    }

    #[test]
    fn test_five_failures_fire_exactly_one_alert() {
        let monitor = AnomalyMonitor::new(5, Duration::from_secs(300));

        let mut alerts = 0;
        for i in 0..5 {
            if monitor.record("1.2.3.4", at(1_000 + i)) {
                alerts += 1;
            }
        }

        assert_eq!(alerts, 1);
        assert_eq!(monitor.alerts_emitted(), 1);
        assert_eq!(monitor.count("1.2.3.4", at(1_005)), 5);
    }

    #[test]
    fn test_no_alert_repeats_while_above_threshold() {
        let monitor = AnomalyMonitor::new(3, Duration::from_secs(300));

        for i in 0..10 {
            monitor.record("1.2.3.4", at(1_000 + i));
        }

        // Crossed once at the third failure, stayed above since.
        assert_eq!(monitor.alerts_emitted(), 1);
    }

    #[test]
    fn test_alert_rearms_after_window_slides() {
        let monitor = AnomalyMonitor::new(3, Duration::from_secs(100));

        assert!(!monitor.record("src", at(1_000)));
        assert!(!monitor.record("src", at(1_001)));
        assert!(monitor.record("src", at(1_002)));

        // Far outside the window: count resets, crossing fires again.
        assert!(!monitor.record("src", at(2_000)));
        assert!(!monitor.record("src", at(2_001)));
        assert!(monitor.record("src", at(2_002)));

        assert_eq!(monitor.alerts_emitted(), 2);
    }

    #[test]
    fn test_old_entries_pruned_lazily() {
        let monitor = AnomalyMonitor::new(100, Duration::from_secs(60));

        monitor.record("src", at(1_000));
        monitor.record("src", at(1_010));
        assert_eq!(monitor.count("src", at(1_020)), 2);

        // 70s later the first entry has aged out.
        assert_eq!(monitor.count("src", at(1_071)), 1);
    }

    #[test]
    fn test_sources_are_independent() {
        let monitor = AnomalyMonitor::new(2, Duration::from_secs(300));

        monitor.record("a", at(1_000));
        monitor.record("b", at(1_000));

        assert_eq!(monitor.count("a", at(1_001)), 1);
        assert_eq!(monitor.count("b", at(1_001)), 1);
        assert_eq!(monitor.alerts_emitted(), 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let monitor = AnomalyMonitor::new(5, Duration::from_secs(300));
        monitor.record("a", at(1_000));
        monitor.record("a", at(1_001));
        monitor.record("b", at(1_002));

        let mut stats = monitor.stats(at(1_003));
        stats.sort_by(|x, y| x.source.cmp(&y.source));

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].failures_in_window, 2);
        assert_eq!(stats[1].failures_in_window, 1);
    }
}
