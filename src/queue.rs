//! FIFO-within-priority work queue handing discovered infohashes to the
//! metadata worker pool, with dedup against whatever is already queued or
//! in flight so one torrent never occupies two worker slots at once.
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::model::Priority;
use crate::types::InfoHash;

const PRIORITY_LEVELS: usize = 5;

fn priority_slot(p: Priority) -> usize {
    // Priority discriminants run 1..=5; slot 0 is the highest-priority deque.
    PRIORITY_LEVELS - (p as usize)
}

struct Inner {
    lanes: [VecDeque<InfoHash>; PRIORITY_LEVELS],
    queued: HashSet<InfoHash>,
    in_flight: HashSet<InfoHash>,
}

/// Bounded multi-lane queue: `Bep51` drains before `Manual` before
/// `DhtAnnounce` before `DhtPeers` before `DhtItem`, FIFO inside each lane.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    AlreadyQueued,
    AlreadyInFlight,
    Full,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> WorkQueue {
        WorkQueue {
            inner: Mutex::new(Inner {
                lanes: std::array::from_fn(|_| VecDeque::new()),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, info_hash: InfoHash, priority: Priority) -> EnqueueOutcome {
        let mut inner = self.inner.lock().expect("queue poisoned");
        if inner.in_flight.contains(&info_hash) {
            return EnqueueOutcome::AlreadyInFlight;
        }
        if inner.queued.contains(&info_hash) {
            return EnqueueOutcome::AlreadyQueued;
        }
        if inner.queued.len() >= self.capacity {
            return EnqueueOutcome::Full;
        }
        inner.queued.insert(info_hash);
        inner.lanes[priority_slot(priority)].push_back(info_hash);
        drop(inner);
        self.notify.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Resolves once some lane has gained an entry since the last call (or
    /// immediately if one is already pending). Workers wait on this
    /// instead of busy-polling an empty queue (spec.md 5: "bounded
    /// condition wait on the priority queue").
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Pops the head of the highest-priority non-empty lane and marks it
    /// in flight. Returns None when every lane is empty.
    pub fn dequeue(&self) -> Option<InfoHash> {
        let mut inner = self.inner.lock().expect("queue poisoned");
        for lane in inner.lanes.iter_mut() {
            if let Some(info_hash) = lane.pop_front() {
                inner.queued.remove(&info_hash);
                inner.in_flight.insert(info_hash);
                return Some(info_hash);
            }
        }
        None
    }

    /// Releases an in-flight slot once a worker's session ends (success,
    /// failure, or timeout) so the infohash can be requeued later.
    pub fn release(&self, info_hash: &InfoHash) {
        self.inner.lock().expect("queue poisoned").in_flight.remove(info_hash);
    }

    pub fn is_in_flight(&self, info_hash: &InfoHash) -> bool {
        self.inner.lock().expect("queue poisoned").in_flight.contains(info_hash)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("queue poisoned");
        inner.lanes.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().expect("queue poisoned").in_flight.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ih(b: u8) -> InfoHash {
        InfoHash::new([b; 20])
    }

    #[test]
    fn higher_priority_lanes_drain_first() {
        let q = WorkQueue::new(100);
        q.enqueue(ih(1), Priority::DhtItem);
        q.enqueue(ih(2), Priority::Bep51);
        q.enqueue(ih(3), Priority::Manual);
        assert_eq!(q.dequeue(), Some(ih(2)));
        assert_eq!(q.dequeue(), Some(ih(3)));
        assert_eq!(q.dequeue(), Some(ih(1)));
    }

    #[test]
    fn fifo_within_a_lane() {
        let q = WorkQueue::new(100);
        q.enqueue(ih(1), Priority::DhtPeers);
        q.enqueue(ih(2), Priority::DhtPeers);
        q.enqueue(ih(3), Priority::DhtPeers);
        assert_eq!(q.dequeue(), Some(ih(1)));
        assert_eq!(q.dequeue(), Some(ih(2)));
        assert_eq!(q.dequeue(), Some(ih(3)));
    }

    #[test]
    fn duplicate_enqueue_is_rejected_while_queued() {
        let q = WorkQueue::new(100);
        assert_eq!(q.enqueue(ih(1), Priority::DhtPeers), EnqueueOutcome::Enqueued);
        assert_eq!(q.enqueue(ih(1), Priority::Manual), EnqueueOutcome::AlreadyQueued);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn in_flight_blocks_requeue_until_released() {
        let q = WorkQueue::new(100);
        q.enqueue(ih(1), Priority::DhtPeers);
        assert_eq!(q.dequeue(), Some(ih(1)));
        assert_eq!(q.enqueue(ih(1), Priority::DhtPeers), EnqueueOutcome::AlreadyInFlight);
        q.release(&ih(1));
        assert_eq!(q.enqueue(ih(1), Priority::DhtPeers), EnqueueOutcome::Enqueued);
    }

    #[test]
    fn full_queue_rejects_new_work() {
        let q = WorkQueue::new(1);
        assert_eq!(q.enqueue(ih(1), Priority::DhtPeers), EnqueueOutcome::Enqueued);
        assert_eq!(q.enqueue(ih(2), Priority::DhtPeers), EnqueueOutcome::Full);
    }
}
