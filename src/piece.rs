//! Per-infohash metadata piece state machine: tracks each 16 KiB `info`
//! dict slice from MISSING through VALIDATED (or a terminal failure) and
//! reassembles the complete dictionary once every slot validates.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};

use crate::types::InfoHash;

pub const PIECE_SIZE: usize = 16384;
pub const MAX_PIECES: usize = 1024;
const BITMAP_BYTES: usize = MAX_PIECES / 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PieceStatus {
    Missing,
    Requested,
    Received,
    Validated,
    Invalid,
    Duplicate,
    Corrupted,
    Expired,
}

impl PieceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PieceStatus::Validated
                | PieceStatus::Invalid
                | PieceStatus::Duplicate
                | PieceStatus::Corrupted
                | PieceStatus::Expired
        )
    }
}

#[derive(Clone, Debug)]
pub struct MetadataPiece {
    pub index: u32,
    pub status: PieceStatus,
    pub data: Option<Vec<u8>>,
    pub checksum: Option<[u8; 20]>,
    pub request_count: u32,
    pub retry_count: u32,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub quality: f64,
}

impl MetadataPiece {
    fn new(index: u32, now: Instant, timeout: Duration) -> MetadataPiece {
        MetadataPiece {
            index,
            status: PieceStatus::Missing,
            data: None,
            checksum: None,
            request_count: 0,
            retry_count: 0,
            created_at: now,
            expires_at: now + timeout,
            quality: 0.5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PieceError {
    #[error("piece {index} exceeds max_piece_size ({len} > {max})")]
    TooLarge { index: u32, len: usize, max: usize },
    #[error("piece index {index} out of range (total_pieces={total})")]
    OutOfRange { index: u32, total: u32 },
}

/// Per-InfoHash piece map plus the 1024-bit bitmap used to track which
/// slots have validated, per spec.md 3/4.4.
pub struct PieceManager {
    info_hash: InfoHash,
    total_pieces: u32,
    total_size: usize,
    pieces: HashMap<u32, MetadataPiece>,
    bitmap: [u8; BITMAP_BYTES],
    piece_timeout: Duration,
    max_piece_size: usize,
}

impl PieceManager {
    /// Fails (returns None) if `total_pieces` exceeds MAX_PIECES (16 MiB of
    /// metadata) -- rejected as oversize per spec.md 4.4.
    pub fn new(info_hash: InfoHash, total_size: usize, piece_timeout: Duration) -> Option<PieceManager> {
        let total_pieces = total_size.div_ceil(PIECE_SIZE) as u32;
        if total_pieces as usize > MAX_PIECES {
            return None;
        }
        Some(PieceManager {
            info_hash,
            total_pieces,
            total_size,
            pieces: HashMap::new(),
            bitmap: [0u8; BITMAP_BYTES],
            piece_timeout,
            max_piece_size: PIECE_SIZE,
        })
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn total_pieces(&self) -> u32 {
        self.total_pieces
    }

    fn expected_len(&self, index: u32) -> usize {
        if index as usize == self.total_pieces as usize - 1 {
            let rem = self.total_size % PIECE_SIZE;
            if rem == 0 {
                PIECE_SIZE
            } else {
                rem
            }
        } else {
            PIECE_SIZE
        }
    }

    pub fn mark_requested(&mut self, index: u32, now: Instant) {
        let timeout = self.piece_timeout;
        let slot = self
            .pieces
            .entry(index)
            .or_insert_with(|| MetadataPiece::new(index, now, timeout));
        slot.status = PieceStatus::Requested;
        slot.request_count += 1;
        slot.expires_at = now + timeout;
    }

    /// Records the received bytes (fails if oversize), sets status
    /// RECEIVED, and hashes the payload for later duplicate detection.
    pub fn add_piece(&mut self, index: u32, data: Vec<u8>, now: Instant) -> Result<(), PieceError> {
        if index >= self.total_pieces {
            return Err(PieceError::OutOfRange { index, total: self.total_pieces });
        }
        if data.len() > self.max_piece_size {
            return Err(PieceError::TooLarge {
                index,
                len: data.len(),
                max: self.max_piece_size,
            });
        }

        let mut hasher = Sha1::new();
        hasher.update(&data);
        let checksum: [u8; 20] = hasher.finalize().into();

        let timeout = self.piece_timeout;
        let slot = self
            .pieces
            .entry(index)
            .or_insert_with(|| MetadataPiece::new(index, now, timeout));

        if slot.status == PieceStatus::Validated {
            // Already settled; a late duplicate reply is a no-op, not an error.
            return Ok(());
        }
        if let Some(existing) = slot.checksum {
            if existing == checksum && slot.status == PieceStatus::Received {
                slot.status = PieceStatus::Duplicate;
                return Ok(());
            }
        }

        slot.data = Some(data);
        slot.checksum = Some(checksum);
        slot.status = PieceStatus::Received;
        Ok(())
    }

    /// Transitions a RECEIVED piece into VALIDATED (expected length
    /// matches) or INVALID. Updates the bitmap and rolling quality.
    pub fn validate_piece(&mut self, index: u32) -> Option<PieceStatus> {
        let expected_len = self.expected_len(index);
        let slot = self.pieces.get_mut(&index)?;
        if slot.status != PieceStatus::Received {
            return Some(slot.status);
        }
        let ok = slot.data.as_ref().map(|d| d.len() == expected_len).unwrap_or(false);
        if ok {
            slot.status = PieceStatus::Validated;
            slot.quality = (slot.quality + 1.0) / 2.0;
            set_bit(&mut self.bitmap, index as usize);
        } else {
            slot.status = PieceStatus::Invalid;
            slot.quality /= 2.0;
        }
        Some(slot.status)
    }

    /// Sweeps REQUESTED pieces whose deadline has passed into EXPIRED so
    /// the worker knows to retry them.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<u32> {
        let mut expired = Vec::new();
        for (idx, piece) in self.pieces.iter_mut() {
            if piece.status == PieceStatus::Requested && now >= piece.expires_at {
                piece.status = PieceStatus::Expired;
                piece.retry_count += 1;
                expired.push(*idx);
            }
        }
        expired
    }

    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_pieces)
            .filter(|i| !matches!(self.pieces.get(i), Some(p) if !matches!(p.status, PieceStatus::Missing | PieceStatus::Expired)))
            .collect()
    }

    pub fn received(&self) -> Vec<u32> {
        self.pieces
            .values()
            .filter(|p| p.status == PieceStatus::Received)
            .map(|p| p.index)
            .collect()
    }

    pub fn validated(&self) -> Vec<u32> {
        self.pieces
            .values()
            .filter(|p| p.status == PieceStatus::Validated)
            .map(|p| p.index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        (0..self.total_pieces).all(|i| get_bit(&self.bitmap, i as usize))
    }

    /// Concatenates every validated slot and checks the SHA-1 against the
    /// InfoHash. Returns the assembled bytes only on a match.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut buf = Vec::with_capacity(self.total_size);
        for i in 0..self.total_pieces {
            let piece = self.pieces.get(&i)?;
            buf.extend_from_slice(piece.data.as_ref()?);
        }
        let mut hasher = Sha1::new();
        hasher.update(&buf);
        let digest: [u8; 20] = hasher.finalize().into();
        if &digest == self.info_hash.as_bytes() {
            Some(buf)
        } else {
            None
        }
    }
}

fn set_bit(bitmap: &mut [u8; BITMAP_BYTES], index: usize) {
    bitmap[index / 8] |= 1 << (index % 8);
}

fn get_bit(bitmap: &[u8; BITMAP_BYTES], index: usize) -> bool {
    bitmap[index / 8] & (1 << (index % 8)) != 0
}

#[cfg(test)]
mod test {
    use super::*;

    fn hash_of(data: &[u8]) -> InfoHash {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest: [u8; 20] = hasher.finalize().into();
        InfoHash::new(digest)
    }

    #[test]
    fn exact_16384_byte_info_needs_one_piece() {
        let data = vec![7u8; 16384];
        let mgr = PieceManager::new(hash_of(&data), data.len(), Duration::from_secs(30)).unwrap();
        assert_eq!(mgr.total_pieces(), 1);
    }

    #[test]
    fn one_byte_over_needs_two_pieces_second_is_one_byte() {
        let data = vec![7u8; 16385];
        let mut mgr = PieceManager::new(hash_of(&data), data.len(), Duration::from_secs(30)).unwrap();
        assert_eq!(mgr.total_pieces(), 2);
        assert_eq!(mgr.expected_len(1), 1);
    }

    #[test]
    fn oversize_metadata_is_rejected() {
        let too_big = (MAX_PIECES + 1) * PIECE_SIZE;
        assert!(PieceManager::new(InfoHash::new([0u8; 20]), too_big, Duration::from_secs(30)).is_none());
    }

    #[test]
    fn assemble_validates_sha1_against_info_hash() {
        let data = vec![42u8; 20000];
        let info_hash = hash_of(&data);
        let mut mgr = PieceManager::new(info_hash, data.len(), Duration::from_secs(30)).unwrap();
        let now = Instant::now();
        mgr.add_piece(0, data[0..16384].to_vec(), now).unwrap();
        mgr.add_piece(1, data[16384..].to_vec(), now).unwrap();
        mgr.validate_piece(0);
        mgr.validate_piece(1);
        assert!(mgr.is_complete());
        let assembled = mgr.assemble().expect("should assemble");
        assert_eq!(assembled, data);
    }

    #[test]
    fn hash_mismatch_fails_assembly() {
        let data = vec![1u8; 16384];
        let wrong_hash = InfoHash::new([9u8; 20]);
        let mut mgr = PieceManager::new(wrong_hash, data.len(), Duration::from_secs(30)).unwrap();
        let now = Instant::now();
        mgr.add_piece(0, data, now).unwrap();
        mgr.validate_piece(0);
        assert!(mgr.assemble().is_none());
    }

    #[test]
    fn oversize_piece_is_rejected() {
        let mut mgr = PieceManager::new(InfoHash::new([0u8; 20]), 32768, Duration::from_secs(30)).unwrap();
        let now = Instant::now();
        let err = mgr.add_piece(0, vec![0u8; PIECE_SIZE + 1], now).unwrap_err();
        assert!(matches!(err, PieceError::TooLarge { .. }));
    }

    #[test]
    fn requested_piece_expires_after_timeout() {
        let mut mgr = PieceManager::new(InfoHash::new([0u8; 20]), 16384, Duration::from_millis(10)).unwrap();
        let now = Instant::now();
        mgr.mark_requested(0, now);
        let expired = mgr.expire_overdue(now + Duration::from_millis(11));
        assert_eq!(expired, vec![0]);
    }
}
