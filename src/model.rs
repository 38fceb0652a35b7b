use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Instant;

use crate::types::InfoHash;

/// (address, port) pair. Equality is the exact tuple match spec.md requires.
pub type Endpoint = SocketAddr;

pub fn endpoint(ip: IpAddr, port: u16) -> Endpoint {
    SocketAddr::new(ip, port)
}

/// Where an infohash observation or peer sighting came from. Drives both
/// queue priority (`Priority::from`) and Sink bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeerSource {
    Manual,
    Bep51,
    DhtPeers,
    DhtAnnounce,
    DhtItem,
    IncomingQuery,
}

impl PeerSource {
    pub fn priority(&self) -> Priority {
        match self {
            PeerSource::Manual => Priority::Manual,
            PeerSource::Bep51 => Priority::Bep51,
            PeerSource::DhtPeers => Priority::DhtPeers,
            PeerSource::DhtAnnounce => Priority::DhtAnnounce,
            PeerSource::DhtItem | PeerSource::IncomingQuery => Priority::DhtItem,
        }
    }
}

/// Queue discipline priority. Higher drains first; FIFO within a priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    DhtItem = 1,
    DhtAnnounce = 2,
    DhtPeers = 3,
    Manual = 4,
    Bep51 = 5,
}

/// Error kinds surfaced to the Sink. Not exception types — a closed
/// classification the core commits to at every call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Network,
    Protocol,
    Timeout,
    Validation,
    Capacity,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Protocol => "PROTOCOL",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Capacity => "CAPACITY",
        }
    }
}

/// Failure taxonomy for a metadata fetch session (spec.md 4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    ConnectFailed,
    HandshakeFailed,
    NegotiationFailed,
    PieceRejected,
    HashMismatch,
    ParseError,
}

impl FetchFailure {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            FetchFailure::Timeout => ErrorKind::Timeout,
            FetchFailure::ConnectFailed => ErrorKind::Network,
            FetchFailure::HandshakeFailed => ErrorKind::Protocol,
            FetchFailure::NegotiationFailed => ErrorKind::Protocol,
            FetchFailure::PieceRejected => ErrorKind::Protocol,
            FetchFailure::HashMismatch => ErrorKind::Validation,
            FetchFailure::ParseError => ErrorKind::Validation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchFailure::Timeout => "TIMEOUT",
            FetchFailure::ConnectFailed => "CONNECT_FAILED",
            FetchFailure::HandshakeFailed => "HANDSHAKE_FAILED",
            FetchFailure::NegotiationFailed => "NEGOTIATION_FAILED",
            FetchFailure::PieceRejected => "PIECE_REJECTED",
            FetchFailure::HashMismatch => "HASH_MISMATCH",
            FetchFailure::ParseError => "PARSE_ERROR",
        }
    }
}

/// A file entry inside a multi-file torrent's `info` dictionary.
#[derive(Clone, Debug, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
}

/// A torrent known to the crawler. Created on first DHT observation
/// (name unknown, metadata_received=false), mutated in place once the
/// metadata worker pool validates the `info` dict.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredTorrent {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub piece_length: Option<u64>,
    pub piece_count: Option<u32>,
    pub file_count: Option<u32>,
    pub files: Vec<FileEntry>,
    pub creation_date: Option<i64>,
    pub trackers: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub private: Option<bool>,
    pub source: PeerSource,
    pub metadata_received: bool,
    pub timed_out: bool,
    pub discovered_at: Instant,
    pub last_seen_at: Instant,
}

impl DiscoveredTorrent {
    pub fn observed(info_hash: InfoHash, source: PeerSource) -> DiscoveredTorrent {
        DiscoveredTorrent::observed_at(info_hash, source, Instant::now())
    }

    pub fn observed_at(info_hash: InfoHash, source: PeerSource, now: Instant) -> DiscoveredTorrent {
        DiscoveredTorrent {
            info_hash,
            name: None,
            size: None,
            piece_length: None,
            piece_count: None,
            file_count: None,
            files: Vec::new(),
            creation_date: None,
            trackers: Vec::new(),
            comment: None,
            created_by: None,
            private: None,
            source,
            metadata_received: false,
            timed_out: false,
            discovered_at: now,
            last_seen_at: now,
        }
    }
}

/// Wall-clock abstraction so timeout logic (rate limiter, piece expiry,
/// session deadlines) is testable without sleeping in unit tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub struct TestClock {
    base: Instant,
    offset_ms: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl TestClock {
    pub fn new() -> TestClock {
        TestClock {
            base: Instant::now(),
            offset_ms: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.offset_ms.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + std::time::Duration::from_millis(self.offset_ms.load(std::sync::atomic::Ordering::SeqCst))
    }
}
