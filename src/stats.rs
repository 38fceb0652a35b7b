//! Lightweight in-memory counters, generalized from the much heavier
//! `PerformanceMonitor` this crawler's original monitored: no dashboard,
//! no alert manager, just the numbers `log` and a periodic snapshot need.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub queries_sent: u64,
    pub queries_blocked: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub torrents_discovered: u64,
    pub torrents_resolved: u64,
    pub metadata_sessions_failed: u64,
    pub peers_seen: u64,
    pub parse_errors: u64,
    pub routing_table_size: u64,
}

/// One atomic per counter; cheap to bump from any task without a lock.
#[derive(Default)]
pub struct Stats {
    queries_sent: AtomicU64,
    queries_blocked: AtomicU64,
    responses_received: AtomicU64,
    timeouts: AtomicU64,
    torrents_discovered: AtomicU64,
    torrents_resolved: AtomicU64,
    metadata_sessions_failed: AtomicU64,
    peers_seen: AtomicU64,
    parse_errors: AtomicU64,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn incr_queries_sent(&self) {
        self.queries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_queries_blocked(&self) {
        self.queries_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_responses_received(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_torrents_discovered(&self) {
        self.torrents_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_torrents_resolved(&self) {
        self.torrents_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_metadata_sessions_failed(&self) {
        self.metadata_sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_peers_seen(&self) {
        self.peers_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, routing_table_size: u64) -> StatsSnapshot {
        StatsSnapshot {
            queries_sent: self.queries_sent.load(Ordering::Relaxed),
            queries_blocked: self.queries_blocked.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            torrents_discovered: self.torrents_discovered.load(Ordering::Relaxed),
            torrents_resolved: self.torrents_resolved.load(Ordering::Relaxed),
            metadata_sessions_failed: self.metadata_sessions_failed.load(Ordering::Relaxed),
            peers_seen: self.peers_seen.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            routing_table_size,
        }
    }
}

impl StatsSnapshot {
    pub fn response_rate(&self) -> f64 {
        if self.queries_sent == 0 {
            0.0
        } else {
            self.responses_received as f64 / self.queries_sent as f64
        }
    }

    pub fn log_line(&self) -> String {
        format!(
            "queries={} blocked={} responses={} timeouts={} discovered={} resolved={} failed={} peers={} parse_errors={} rt_size={} response_rate={:.3}",
            self.queries_sent,
            self.queries_blocked,
            self.responses_received,
            self.timeouts,
            self.torrents_discovered,
            self.torrents_resolved,
            self.metadata_sessions_failed,
            self.peers_seen,
            self.parse_errors,
            self.routing_table_size,
            self.response_rate(),
        )
    }
}

/// Periodic maintenance ticks against this to decide when to emit a
/// `Stats` snapshot to the log, independent of any external timer.
pub struct StatsTicker {
    last_emit: std::sync::Mutex<Instant>,
    interval: std::time::Duration,
}

impl StatsTicker {
    pub fn new(interval: std::time::Duration, now: Instant) -> StatsTicker {
        StatsTicker {
            last_emit: std::sync::Mutex::new(now),
            interval,
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        let mut last = self.last_emit.lock().expect("stats ticker poisoned");
        if now.duration_since(*last) >= self.interval {
            *last = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = Stats::new();
        stats.incr_queries_sent();
        stats.incr_queries_sent();
        stats.incr_responses_received();
        let snap = stats.snapshot(42);
        assert_eq!(snap.queries_sent, 2);
        assert_eq!(snap.responses_received, 1);
        assert_eq!(snap.routing_table_size, 42);
        assert!((snap.response_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ticker_fires_once_per_interval() {
        let now = Instant::now();
        let ticker = StatsTicker::new(std::time::Duration::from_secs(10), now);
        assert!(!ticker.due(now + std::time::Duration::from_secs(5)));
        assert!(ticker.due(now + std::time::Duration::from_secs(11)));
        assert!(!ticker.due(now + std::time::Duration::from_secs(12)));
    }
}
