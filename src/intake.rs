//! First point of contact for any infohash the crawler observes, whether
//! from a DHT `get_peers`/`announce_peer`, a `sample_infohashes` reply, or
//! a manually seeded one. First sighting creates the `DiscoveredTorrent`
//! and pushes it onto the work queue; repeat sightings just bump the
//! last-seen clock and record the new peer hint.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::model::{DiscoveredTorrent, PeerSource};
use crate::queue::{EnqueueOutcome, WorkQueue};
use crate::sink::Sink;
use crate::stats::Stats;
use crate::types::InfoHash;

struct SeenEntry {
    first_seen: Instant,
    last_seen: Instant,
    sightings: u32,
    peer_hints: Vec<SocketAddr>,
}

const MAX_PEER_HINTS: usize = 16;

/// spec.md 4.2(b): a torrent is a priority `get_peers` target once it has
/// this many known peer hints...
const PRIORITY_MIN_PEER_HINTS: usize = 3;
/// ...or was observed at all within this window, whichever comes first.
const PRIORITY_RECENT_WINDOW: Duration = Duration::from_secs(10 * 60);

pub struct Intake {
    seen: Mutex<HashMap<InfoHash, SeenEntry>>,
    queue: Arc<WorkQueue>,
    sink: Arc<dyn Sink>,
    stats: Arc<Stats>,
}

impl Intake {
    pub fn new(queue: Arc<WorkQueue>, sink: Arc<dyn Sink>, stats: Arc<Stats>) -> Intake {
        Intake {
            seen: Mutex::new(HashMap::new()),
            queue,
            sink,
            stats,
        }
    }

    /// Records an observation. Returns true if this was the torrent's
    /// first sighting (the caller may want to log it differently).
    pub fn observe(&self, info_hash: InfoHash, source: PeerSource, peer_hint: Option<SocketAddr>, now: Instant) -> bool {
        let first_sighting = {
            let mut seen = self.seen.lock().expect("intake poisoned");
            match seen.get_mut(&info_hash) {
                Some(entry) => {
                    entry.last_seen = now;
                    entry.sightings += 1;
                    if let Some(addr) = peer_hint {
                        if !entry.peer_hints.contains(&addr) {
                            if entry.peer_hints.len() >= MAX_PEER_HINTS {
                                entry.peer_hints.remove(0);
                            }
                            entry.peer_hints.push(addr);
                        }
                    }
                    false
                }
                None => {
                    seen.insert(
                        info_hash,
                        SeenEntry {
                            first_seen: now,
                            last_seen: now,
                            sightings: 1,
                            peer_hints: peer_hint.into_iter().collect(),
                        },
                    );
                    true
                }
            }
        };

        if let Some(addr) = peer_hint {
            self.stats.incr_peers_seen();
            let _ = self.sink.record_peer(&info_hash, addr, source);
        }

        if first_sighting {
            self.stats.incr_torrents_discovered();
            let torrent = DiscoveredTorrent::observed_at(info_hash, source, now);
            let _ = self.sink.record_torrent(&torrent);
            self.queue.enqueue(info_hash, source.priority());
        }

        first_sighting
    }

    pub fn peer_hints(&self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        self.seen
            .lock()
            .expect("intake poisoned")
            .get(info_hash)
            .map(|e| e.peer_hints.clone())
            .unwrap_or_default()
    }

    pub fn sightings(&self, info_hash: &InfoHash) -> Option<u32> {
        self.seen.lock().expect("intake poisoned").get(info_hash).map(|e| e.sightings)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("intake poisoned").len()
    }

    /// InfoHashes worth sampling with a `get_peers` before falling back to
    /// a random target: those observed with at least
    /// `PRIORITY_MIN_PEER_HINTS` peers, or seen at all within the last
    /// `PRIORITY_RECENT_WINDOW` (spec.md 4.2(b)).
    pub fn priority_targets(&self, now: Instant) -> Vec<InfoHash> {
        self.seen
            .lock()
            .expect("intake poisoned")
            .iter()
            .filter(|(_, entry)| {
                entry.peer_hints.len() >= PRIORITY_MIN_PEER_HINTS || now.duration_since(entry.last_seen) <= PRIORITY_RECENT_WINDOW
            })
            .map(|(info_hash, _)| *info_hash)
            .collect()
    }

    /// Re-enqueues a torrent whose metadata session failed, so the
    /// worker pool gets another shot at it from a fresh peer hint.
    pub fn retry(&self, info_hash: InfoHash, source: PeerSource) -> EnqueueOutcome {
        self.queue.enqueue(info_hash, source.priority())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::NullSink;

    fn intake() -> Intake {
        Intake::new(Arc::new(WorkQueue::new(100)), Arc::new(NullSink), Arc::new(Stats::new()))
    }

    #[test]
    fn first_sighting_enqueues_and_returns_true() {
        let intake = intake();
        let now = Instant::now();
        let info_hash = InfoHash::new([1u8; 20]);
        assert!(intake.observe(info_hash, PeerSource::DhtPeers, None, now));
        assert_eq!(intake.queue.len(), 1);
    }

    #[test]
    fn repeat_sighting_does_not_reenqueue() {
        let intake = intake();
        let now = Instant::now();
        let info_hash = InfoHash::new([2u8; 20]);
        assert!(intake.observe(info_hash, PeerSource::DhtPeers, None, now));
        assert!(!intake.observe(info_hash, PeerSource::DhtPeers, None, now));
        assert_eq!(intake.queue.len(), 1);
        assert_eq!(intake.sightings(&info_hash), Some(2));
    }

    #[test]
    fn priority_targets_includes_torrents_with_enough_peers_or_recent_sightings() {
        let intake = intake();
        let base = Instant::now();
        let later = base + Duration::from_secs(3600);

        let stale_no_peers = InfoHash::new([6u8; 20]);
        intake.observe(stale_no_peers, PeerSource::DhtAnnounce, None, base);

        let many_peers = InfoHash::new([4u8; 20]);
        for i in 0..3u16 {
            let addr = SocketAddr::from(([127, 0, 0, 1], 3000 + i));
            intake.observe(many_peers, PeerSource::DhtPeers, Some(addr), later);
        }

        let recent_no_peers = InfoHash::new([5u8; 20]);
        intake.observe(recent_no_peers, PeerSource::DhtAnnounce, None, later);

        let targets = intake.priority_targets(later);
        assert!(targets.contains(&many_peers));
        assert!(targets.contains(&recent_no_peers));
        assert!(!targets.contains(&stale_no_peers));
    }

    #[test]
    fn peer_hints_accumulate_up_to_cap() {
        let intake = intake();
        let now = Instant::now();
        let info_hash = InfoHash::new([3u8; 20]);
        for i in 0..(MAX_PEER_HINTS as u16 + 5) {
            let addr = SocketAddr::from(([127, 0, 0, 1], 2000 + i));
            intake.observe(info_hash, PeerSource::DhtAnnounce, Some(addr), now);
        }
        assert_eq!(intake.peer_hints(&info_hash).len(), MAX_PEER_HINTS);
    }
}
