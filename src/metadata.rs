//! Metadata Worker Pool: turns a discovered InfoHash into validated
//! torrent metadata by driving one peer session at a time through the
//! BEP 9 pipeline, generalizing the teacher's blocking `peer::handshake`
//! plus `message.rs`/`extension.rs`/`peer_metainfo.rs` wire code into an
//! async, retryable, many-worker pool.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::bencode::parse_bencoded;
use crate::blacklist::Blacklist;
use crate::config::Config;
use crate::dht::DhtEngine;
use crate::extension::{Extension, PeerExtensionHandshake};
use crate::feature::Feature;
use crate::message::{self, Frame, Handshake};
use crate::metainfo::parse_metadata;
use crate::model::{DiscoveredTorrent, FetchFailure, PeerSource};
use crate::peer_metainfo::PeerMetainfoMessage;
use crate::piece::PieceManager;
use crate::queue::WorkQueue;
use crate::sink::Sink;
use crate::stats::Stats;
use crate::types::InfoHash;

/// `-DC0001-` followed by 12 random ASCII digits, per spec.md 4.3 step 3.
pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-DC0001-");
    let mut rng = rand::thread_rng();
    for slot in id[8..].iter_mut() {
        *slot = b'0' + rng.gen_range(0..10);
    }
    id
}

/// Registers a retry attempt for `idx`, failing once `max` is exceeded and
/// otherwise scheduling its next eligible request time with exponential
/// backoff (1s, 2s, 4s, ...).
fn bump_retry(
    idx: u32,
    retries: &mut std::collections::HashMap<u32, u32>,
    next_attempt_at: &mut std::collections::HashMap<u32, Instant>,
    max: u32,
) -> Result<(), ()> {
    let attempts = retries.entry(idx).or_insert(0);
    *attempts += 1;
    if *attempts > max {
        return Err(());
    }
    let backoff = Duration::from_secs(1).mul_f64(2f64.powi(*attempts as i32 - 1));
    next_attempt_at.insert(idx, Instant::now() + backoff);
    Ok(())
}

/// Fixed-size pool of workers pulling InfoHashes off the shared queue and
/// driving each to a validated `DiscoveredTorrent` or a terminal
/// `FetchFailure`.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    dht: Arc<DhtEngine>,
    sink: Arc<dyn Sink>,
    stats: Arc<Stats>,
    blacklist: Arc<Blacklist>,
    peer_id: [u8; 20],
    config: Config,
    shutdown: AtomicBool,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue>, dht: Arc<DhtEngine>, sink: Arc<dyn Sink>, stats: Arc<Stats>, blacklist: Arc<Blacklist>, config: Config) -> WorkerPool {
        WorkerPool {
            queue,
            dht,
            sink,
            stats,
            blacklist,
            peer_id: generate_peer_id(),
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Stops handing out new work; workers finish whatever session they
    /// currently hold (bounded by `session_timeout`) and then exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|idx| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.worker_loop(idx).await })
            })
            .collect()
    }

    async fn worker_loop(&self, idx: usize) {
        while let Some(info_hash) = self.next_work().await {
            debug!("worker {} picked up {}", idx, info_hash);
            match self.run_session(info_hash).await {
                Ok(torrent) => {
                    self.stats.incr_torrents_resolved();
                    let _ = self.sink.record_torrent(&torrent);
                }
                Err(failure) => {
                    self.stats.incr_metadata_sessions_failed();
                    let _ = self.sink.record_error(
                        failure.error_kind(),
                        &format!("{} metadata fetch failed: {}", info_hash, failure.as_str()),
                    );
                }
            }
            self.queue.release(&info_hash);
        }
        debug!("worker {} exiting", idx);
    }

    async fn next_work(&self) -> Option<InfoHash> {
        loop {
            if let Some(h) = self.queue.dequeue() {
                return Some(h);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            tokio::select! {
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
        }
    }

    /// Drives the whole per-InfoHash request lifecycle (spec.md 4.3): peer
    /// selection, then one peer at a time until a session succeeds or the
    /// overall `session_timeout` elapses.
    async fn run_session(&self, info_hash: InfoHash) -> Result<DiscoveredTorrent, FetchFailure> {
        let deadline = Instant::now() + self.config.session_timeout;

        let mut peers = self.dht.known_peers(&info_hash);
        if peers.is_empty() {
            peers = self.dht.find_peers(info_hash, self.config.get_peers_wait).await;
        }
        if peers.is_empty() {
            return Err(FetchFailure::ConnectFailed);
        }

        let mut last_failure = FetchFailure::ConnectFailed;
        for addr in peers {
            if Instant::now() >= deadline {
                break;
            }
            if self.blacklist.is_banned(&addr, Instant::now()) {
                continue;
            }
            match self.fetch_from_peer(info_hash, addr, deadline).await {
                Ok(torrent) => return Ok(torrent),
                Err(failure) => {
                    last_failure = failure;
                    if matches!(
                        failure,
                        FetchFailure::HandshakeFailed | FetchFailure::NegotiationFailed | FetchFailure::PieceRejected | FetchFailure::HashMismatch
                    ) {
                        self.blacklist.strike(addr, failure.as_str(), Instant::now());
                    }
                }
            }
        }
        Err(last_failure)
    }

    /// Steps 2-7 of spec.md 4.3 against a single peer.
    async fn fetch_from_peer(&self, info_hash: InfoHash, addr: SocketAddr, deadline: Instant) -> Result<DiscoveredTorrent, FetchFailure> {
        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FetchFailure::Timeout)?
            .map_err(|_| FetchFailure::ConnectFailed)?;

        let mut reserved = [0u8; 8];
        Feature::Extension.enable(&mut reserved);
        let hs = Handshake::new(*info_hash.as_bytes(), self.peer_id, reserved);
        message::write_handshake(&mut stream, &hs).await.map_err(|_| FetchFailure::HandshakeFailed)?;

        let peer_hs = timeout(self.config.connect_timeout, message::read_handshake(&mut stream))
            .await
            .map_err(|_| FetchFailure::Timeout)?
            .map_err(|_| FetchFailure::HandshakeFailed)?;
        if peer_hs.info_hash != *info_hash.as_bytes() {
            return Err(FetchFailure::HandshakeFailed);
        }
        if !Feature::Extension.enabled(&peer_hs.reserved) {
            return Err(FetchFailure::HandshakeFailed);
        }

        let handshake_payload = Extension::handshake(&[Extension::Metadata], self.config.listen_port).encode();
        message::write_extended(&mut stream, 0, &handshake_payload).await.map_err(|_| FetchFailure::NegotiationFailed)?;
        let peer_ext = self.read_extension_handshake(&mut stream, deadline).await?;

        let mut pieces = PieceManager::new(info_hash, peer_ext.metadata_size, self.config.piece_timeout).ok_or(FetchFailure::NegotiationFailed)?;

        self.run_piece_loop(&mut stream, &mut pieces, peer_ext.ut_metadata_id, deadline).await?;

        let bytes = pieces.assemble().ok_or(FetchFailure::HashMismatch)?;
        let parsed = parse_metadata(&bytes).map_err(|_| FetchFailure::ParseError)?;

        let mut torrent = DiscoveredTorrent::observed(info_hash, PeerSource::DhtPeers);
        torrent.name = parsed.name;
        torrent.size = parsed.size();
        torrent.piece_length = parsed.piece_length;
        torrent.piece_count = parsed.piece_count;
        torrent.file_count = parsed.file_count;
        torrent.files = parsed.files;
        torrent.creation_date = parsed.creation_date;
        torrent.trackers = parsed.trackers;
        torrent.comment = parsed.comment;
        torrent.created_by = parsed.created_by;
        torrent.private = parsed.private;
        torrent.metadata_received = true;
        torrent.last_seen_at = Instant::now();
        Ok(torrent)
    }

    async fn read_extension_handshake(&self, stream: &mut TcpStream, deadline: Instant) -> Result<PeerExtensionHandshake, FetchFailure> {
        loop {
            if Instant::now() >= deadline {
                return Err(FetchFailure::Timeout);
            }
            let frame = timeout(self.config.connect_timeout, message::read_frame(stream))
                .await
                .map_err(|_| FetchFailure::Timeout)?
                .map_err(|_| FetchFailure::NegotiationFailed)?;
            if let Frame::Extended { ext_id: 0, payload } = frame {
                let (value, _) = parse_bencoded(payload);
                let value = value.ok_or(FetchFailure::NegotiationFailed)?;
                return PeerExtensionHandshake::try_from(&value).map_err(|_| FetchFailure::NegotiationFailed);
            }
            // Peer sent something else (a keepalive, an unrelated extended
            // message) before its handshake -- keep reading.
        }
    }

    /// Requests missing pieces in batches of `max_concurrent_requests`,
    /// retrying rejects and expired requests up to `max_retry_attempts`
    /// with exponential backoff between attempts (spec.md 4.3 step 5: 1s
    /// initial, 2.0 multiplier).
    async fn run_piece_loop(&self, stream: &mut TcpStream, pieces: &mut PieceManager, ut_metadata_id: u8, deadline: Instant) -> Result<(), FetchFailure> {
        let batch_size = self.config.max_concurrent_requests.max(1);
        let max_retry_attempts = self.config.max_retry_attempts;
        let mut retries: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
        let mut next_attempt_at: std::collections::HashMap<u32, Instant> = std::collections::HashMap::new();

        while !pieces.is_complete() {
            if Instant::now() >= deadline {
                return Err(FetchFailure::Timeout);
            }

            for idx in pieces.expire_overdue(Instant::now()) {
                if bump_retry(idx, &mut retries, &mut next_attempt_at, max_retry_attempts).is_err() {
                    return Err(FetchFailure::Timeout);
                }
            }

            let now = Instant::now();
            let batch: Vec<u32> = pieces
                .missing()
                .into_iter()
                .filter(|idx| next_attempt_at.get(idx).map_or(true, |&t| now >= t))
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                // Every missing slot is already in flight or cooling down
                // after a backoff; wait for either a reply or the next
                // expiry sweep.
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            for &idx in &batch {
                pieces.mark_requested(idx, Instant::now());
                let payload: Vec<u8> = PeerMetainfoMessage::Request { piece: idx as usize }.into();
                message::write_extended(stream, ut_metadata_id, &payload).await.map_err(|_| FetchFailure::ConnectFailed)?;
            }

            for _ in 0..batch.len() {
                let remaining = deadline.saturating_duration_since(Instant::now()).min(self.config.piece_timeout);
                let frame = match timeout(remaining, message::read_frame(stream)).await {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(_)) => return Err(FetchFailure::ConnectFailed),
                    Err(_) => break, // piece_timeout elapsed; next loop's expire_overdue sweep handles it
                };
                let Frame::Extended { ext_id, payload } = frame else { continue };
                if ext_id != ut_metadata_id {
                    continue;
                }
                match PeerMetainfoMessage::try_from(payload) {
                    Ok(PeerMetainfoMessage::Data { piece, data, .. }) => {
                        if pieces.add_piece(piece as u32, data, Instant::now()).is_ok() {
                            pieces.validate_piece(piece as u32);
                        }
                    }
                    Ok(PeerMetainfoMessage::Reject { piece }) => {
                        if bump_retry(piece as u32, &mut retries, &mut next_attempt_at, max_retry_attempts).is_err() {
                            return Err(FetchFailure::PieceRejected);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
