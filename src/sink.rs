//! Output boundary: everything the crawler learns (torrents, peer
//! sightings, errors) leaves through a `Sink` rather than hardcoding a
//! storage backend, mirroring how the teacher kept `PersistState` as the
//! single place state crosses into the filesystem.
use anyhow::Result;

use crate::model::{DiscoveredTorrent, ErrorKind, PeerSource};
use crate::types::InfoHash;

pub trait Sink: Send + Sync {
    /// Called once on first sighting and again whenever validated
    /// metadata completes a torrent.
    fn record_torrent(&self, torrent: &DiscoveredTorrent) -> Result<()>;

    fn record_peer(&self, info_hash: &InfoHash, addr: std::net::SocketAddr, source: PeerSource) -> Result<()>;

    fn record_error(&self, kind: ErrorKind, context: &str) -> Result<()>;

    /// Best-effort flush of any buffered output; a no-op for sinks that
    /// write synchronously.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything. Useful for benchmarking the crawl path without
/// an output backend.
pub struct NullSink;

impl Sink for NullSink {
    fn record_torrent(&self, _torrent: &DiscoveredTorrent) -> Result<()> {
        Ok(())
    }

    fn record_peer(&self, _info_hash: &InfoHash, _addr: std::net::SocketAddr, _source: PeerSource) -> Result<()> {
        Ok(())
    }

    fn record_error(&self, _kind: ErrorKind, _context: &str) -> Result<()> {
        Ok(())
    }
}

/// Writes every observation through the `log` facade at the level the
/// teacher reserves for this sort of bookkeeping -- info for completed
/// torrents, debug for individual peer sightings, warn for errors.
pub struct LoggingSink;

impl Sink for LoggingSink {
    fn record_torrent(&self, torrent: &DiscoveredTorrent) -> Result<()> {
        if torrent.metadata_received {
            info!(
                "torrent resolved: {} name={:?} size={:?} files={}",
                torrent.info_hash,
                torrent.name,
                torrent.size,
                torrent.files.len()
            );
        } else {
            debug!("torrent observed: {} source={:?}", torrent.info_hash, torrent.source);
        }
        Ok(())
    }

    fn record_peer(&self, info_hash: &InfoHash, addr: std::net::SocketAddr, source: PeerSource) -> Result<()> {
        debug!("peer {} for {} via {:?}", addr, info_hash, source);
        Ok(())
    }

    fn record_error(&self, kind: ErrorKind, context: &str) -> Result<()> {
        warn!("[{}] {}", kind.as_str(), context);
        Ok(())
    }
}
