use core::fmt;

use anyhow::{ensure, Error, Result};

use crate::hex::hex;

pub type ByteString = Vec<u8>;

/// SHA-1 of a torrent's `info` dictionary. Uniquely names a torrent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(bytes: [u8; 20]) -> InfoHash {
        InfoHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }

    /// XOR distance to another 20-byte identity, as used for NodeId too.
    pub fn distance(&self, other: &[u8; 20]) -> [u8; 20] {
        xor20(&self.0, other)
    }
}

impl TryFrom<&[u8]> for InfoHash {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        ensure!(value.len() == 20, "info_hash must be 20 bytes, got {}", value.len());
        let mut buf = [0u8; 20];
        buf.copy_from_slice(value);
        Ok(InfoHash(buf))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 20-byte identifier of a DHT participant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 20]);

impl NodeId {
    pub fn new(bytes: [u8; 20]) -> NodeId {
        NodeId(bytes)
    }

    pub fn random() -> NodeId {
        use rand::RngCore;
        let mut buf = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut buf);
        NodeId(buf)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }

    /// Position of the highest set bit in XOR(self, other): 0 = farthest
    /// (differ in the top bit), 159 = identical.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        bucket_index_of(&xor20(&self.0, &other.0))
    }

    pub fn bucket_index_to(&self, info_hash: &InfoHash) -> usize {
        bucket_index_of(&xor20(&self.0, info_hash.as_bytes()))
    }

    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        xor20(&self.0, &other.0)
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        ensure!(value.len() == 20, "node id must be 20 bytes, got {}", value.len());
        let mut buf = [0u8; 20];
        buf.copy_from_slice(value);
        Ok(NodeId(buf))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.to_hex())
    }
}

pub fn xor20(a: &[u8; 20], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Highest set bit index across a 20-byte (160-bit) big-endian magnitude,
/// counting from the most significant bit (0) to the least (159). An
/// all-zero distance (identical ids) maps to the deepest bucket, 159.
pub fn bucket_index_of(distance: &[u8; 20]) -> usize {
    for (byte_i, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            let bit = byte.leading_zeros() as usize;
            return byte_i * 8 + bit;
        }
    }
    159
}
