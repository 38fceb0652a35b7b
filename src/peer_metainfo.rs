use anyhow::{Context, Error};

use crate::{
    bencode::{parse_bencoded, BencodeValue},
    piece::PIECE_SIZE,
};

pub const METAINFO_PIECE_SIZE: usize = PIECE_SIZE;

/// BEP9 `ut_metadata` extension message: request a piece, hand one back,
/// or tell the requester we don't have it.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerMetainfoMessage {
    Request { piece: usize },
    Data { piece: usize, total_size: usize, data: Vec<u8> },
    Reject { piece: usize },
}

impl PeerMetainfoMessage {
    pub fn msg_type(&self) -> u8 {
        match self {
            PeerMetainfoMessage::Request { .. } => 0,
            PeerMetainfoMessage::Data { .. } => 1,
            PeerMetainfoMessage::Reject { .. } => 2,
        }
    }
}

impl From<PeerMetainfoMessage> for Vec<u8> {
    fn from(value: PeerMetainfoMessage) -> Self {
        let msg_type = BencodeValue::from(value.msg_type() as i64);
        match value {
            PeerMetainfoMessage::Request { piece } => BencodeValue::Dict(
                [("msg_type".into(), msg_type), ("piece".into(), BencodeValue::from(piece as i64))]
                    .into_iter()
                    .collect(),
            )
            .encode(),
            PeerMetainfoMessage::Data { piece, total_size, data } => {
                let header = BencodeValue::Dict(
                    [
                        ("msg_type".into(), msg_type),
                        ("piece".into(), BencodeValue::from(piece as i64)),
                        ("total_size".into(), BencodeValue::from(total_size as i64)),
                    ]
                    .into_iter()
                    .collect(),
                )
                .encode();
                [header, data].concat()
            }
            PeerMetainfoMessage::Reject { piece } => BencodeValue::Dict(
                [("msg_type".into(), msg_type), ("piece".into(), BencodeValue::from(piece as i64))]
                    .into_iter()
                    .collect(),
            )
            .encode(),
        }
    }
}

impl TryFrom<Vec<u8>> for PeerMetainfoMessage {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let (dict, data) = match parse_bencoded(value) {
            (Some(BencodeValue::Dict(d)), left) => (d, left),
            _ => return Err(Error::msg("parse error")),
        };
        let msg_type = dict.get("msg_type").context("no msg_type")?;
        Ok(match msg_type {
            BencodeValue::Int(0) => {
                let piece = match dict.get("piece").context("no piece")? {
                    BencodeValue::Int(i) => *i as usize,
                    _ => return Err(Error::msg("unexpected piece")),
                };
                PeerMetainfoMessage::Request { piece }
            }
            BencodeValue::Int(1) => {
                let piece = match dict.get("piece").context("no piece")? {
                    BencodeValue::Int(i) => *i as usize,
                    _ => return Err(Error::msg("unexpected piece")),
                };
                let total_size = match dict.get("total_size").context("no total_size")? {
                    BencodeValue::Int(i) => *i as usize,
                    _ => return Err(Error::msg("unexpected total_size")),
                };
                PeerMetainfoMessage::Data { piece, total_size, data }
            }
            BencodeValue::Int(2) => {
                let piece = match dict.get("piece") {
                    Some(BencodeValue::Int(i)) => *i as usize,
                    _ => 0,
                };
                PeerMetainfoMessage::Reject { piece }
            }
            _ => return Err(Error::msg("unexpected msg_type")),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_round_trips() {
        let msg = PeerMetainfoMessage::Request { piece: 3 };
        let bytes: Vec<u8> = msg.clone().into();
        assert_eq!(PeerMetainfoMessage::try_from(bytes).unwrap(), msg);
    }

    #[test]
    fn data_round_trips_with_trailing_payload() {
        let msg = PeerMetainfoMessage::Data {
            piece: 1,
            total_size: 40000,
            data: vec![9u8; PIECE_SIZE],
        };
        let bytes: Vec<u8> = msg.clone().into();
        assert_eq!(PeerMetainfoMessage::try_from(bytes).unwrap(), msg);
    }

    #[test]
    fn reject_round_trips() {
        let msg = PeerMetainfoMessage::Reject { piece: 2 };
        let bytes: Vec<u8> = msg.clone().into();
        assert_eq!(PeerMetainfoMessage::try_from(bytes).unwrap(), msg);
    }
}
