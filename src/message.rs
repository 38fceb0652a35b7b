//! Minimal BitTorrent peer wire framing: the fixed 68-byte handshake and
//! the generic 4-byte-length-prefixed message frame used to carry EXTENDED
//! (message id 20) messages. Content-transfer message types
//! (choke/unchoke/request/piece/...) are out of scope here -- this
//! crawler never uploads or downloads torrent content, only the `info`
//! dict via the extension protocol, so any non-extended frame the peer
//! sends is read and discarded.
use anyhow::{ensure, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::hex::hex;

pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
pub const EXTENDED_MSG_ID: u8 = 20;

#[derive(Clone, Debug)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], reserved: [u8; 8]) -> Handshake {
        Handshake { reserved, info_hash, peer_id }
    }

    pub fn encode(&self) -> Vec<u8> {
        let pstrlen = &[PROTOCOL.len() as u8];
        [pstrlen.as_slice(), PROTOCOL, &self.reserved, &self.info_hash, &self.peer_id].concat()
    }
}

pub async fn write_handshake(stream: &mut (impl AsyncWriteExt + Unpin), hs: &Handshake) -> Result<()> {
    stream.write_all(&hs.encode()).await.context("write handshake")?;
    stream.flush().await.context("flush handshake")
}

pub async fn read_handshake(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<Handshake> {
    let mut buf = [0u8; 49 + 20];
    stream.read_exact(&mut buf).await.context("read handshake")?;
    ensure!(buf[0] as usize == PROTOCOL.len(), "invalid pstrlen {}", buf[0]);
    ensure!(&buf[1..20] == PROTOCOL, "invalid pstr: {}", hex(&buf[1..20]));
    let mut reserved = [0u8; 8];
    reserved.copy_from_slice(&buf[20..28]);
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&buf[28..48]);
    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&buf[48..68]);
    Ok(Handshake { reserved, info_hash, peer_id })
}

/// A framed post-handshake message. `Other` covers every message type this
/// crawler has no use for (choke, bitfield, request, piece, ...) -- they
/// are read off the wire (so framing stays in sync) and dropped.
#[derive(Debug)]
pub enum Frame {
    KeepAlive,
    Extended { ext_id: u8, payload: Vec<u8> },
    Other { id: u8, len: u32 },
}

pub async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<Frame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.context("read frame length")?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(Frame::KeepAlive);
    }

    let mut id_buf = [0u8; 1];
    stream.read_exact(&mut id_buf).await.context("read frame id")?;
    let id = id_buf[0];
    let payload_len = len as usize - 1;

    if id == EXTENDED_MSG_ID {
        ensure!(payload_len >= 1, "extended message with no ext_id");
        let mut payload = vec![0u8; payload_len];
        stream.read_exact(&mut payload).await.context("read extended payload")?;
        let ext_id = payload[0];
        Ok(Frame::Extended { ext_id, payload: payload[1..].to_vec() })
    } else {
        let mut sink = vec![0u8; payload_len];
        stream.read_exact(&mut sink).await.context("drain unused frame payload")?;
        trace!("dropped non-extended frame id={} len={}", id, len);
        Ok(Frame::Other { id, len })
    }
}

pub async fn write_extended(stream: &mut (impl AsyncWriteExt + Unpin), ext_id: u8, payload: &[u8]) -> Result<()> {
    let len = (payload.len() + 2) as u32;
    let mut out = Vec::with_capacity(4 + len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    out.push(EXTENDED_MSG_ID);
    out.push(ext_id);
    out.extend_from_slice(payload);
    stream.write_all(&out).await.context("write extended message")?;
    stream.flush().await.context("flush extended message")
}
