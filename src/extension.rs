use anyhow::{ensure, Context, Error};

use crate::bencode::BencodeValue;

pub const CLIENT_VERSION: &str = "dhtcrawl 0.1";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Extension {
    Metadata,
}

impl Extension {
    pub fn id(&self) -> usize {
        match self {
            Extension::Metadata => 1,
        }
    }

    pub fn name(&self) -> String {
        match &self {
            Extension::Metadata => "ut_metadata".into(),
        }
    }

    /// Our outgoing extension handshake payload (BEP 10): the `m` dict
    /// tells the peer which id to use when sending *us* each extension's
    /// messages; `p`/`v` are advisory.
    pub fn handshake(extensions: &[Extension], listen_port: u16) -> BencodeValue {
        BencodeValue::Dict(
            [
                (
                    "m".into(),
                    BencodeValue::Dict(
                        extensions
                            .iter()
                            .enumerate()
                            .map(|(i, ext)| (ext.name(), BencodeValue::from(i as i64 + 1)))
                            .collect(),
                    ),
                ),
                ("p".into(), BencodeValue::from(listen_port as i64)),
                ("v".into(), BencodeValue::from(CLIENT_VERSION)),
            ]
            .into_iter()
            .collect(),
        )
    }
}

/// The peer's half of the handshake, parsed down to the fields the
/// metadata pipeline needs: their assigned `ut_metadata` message id and
/// the advertised size of the `info` dict (spec.md 4.3 step 4).
#[derive(Clone, Copy, Debug)]
pub struct PeerExtensionHandshake {
    pub ut_metadata_id: u8,
    pub metadata_size: usize,
}

impl TryFrom<&BencodeValue> for PeerExtensionHandshake {
    type Error = Error;

    fn try_from(value: &BencodeValue) -> Result<Self, Self::Error> {
        let dict = value.as_dict().context("extension handshake is not a dict")?;
        let m = dict.get("m").and_then(|v| v.as_dict()).context("no 'm' dict")?;
        let ut_metadata_id = m
            .get("ut_metadata")
            .and_then(|v| v.as_int())
            .context("peer does not advertise ut_metadata")?;
        let metadata_size = dict.get("metadata_size").and_then(|v| v.as_int()).context("no metadata_size")?;
        // spec.md 4.3 step 4: id 0 is BEP10's "doesn't support" sentinel and
        // a non-positive metadata_size can't describe a real info dict --
        // either rejects the handshake outright (NEGOTIATION_FAILED).
        ensure!(ut_metadata_id > 0, "peer advertises ut_metadata id {ut_metadata_id}, not supported");
        ensure!(metadata_size > 0, "peer advertises non-positive metadata_size {metadata_size}");
        Ok(PeerExtensionHandshake {
            ut_metadata_id: ut_metadata_id as u8,
            metadata_size: metadata_size as usize,
        })
    }
}

impl TryFrom<usize> for Extension {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        [Extension::Metadata]
            .into_iter()
            .find(|e| e.id() == value)
            .context("unknown id")
    }
}

impl TryFrom<&str> for Extension {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "ut_metadata" => Ok(Extension::Metadata),
            _ => Err(Error::msg("unknown extension")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bencode::parse_bencoded;

    #[test]
    fn our_handshake_round_trips_through_bencode() {
        let body = Extension::handshake(&[Extension::Metadata], 6881);
        let encoded = body.encode();
        let (parsed, _) = parse_bencoded(encoded);
        let dict = parsed.unwrap();
        let m = dict.as_dict().unwrap().get("m").unwrap().as_dict().unwrap();
        assert_eq!(m.get("ut_metadata").unwrap().as_int(), Some(1));
    }

    #[test]
    fn peer_handshake_extracts_ut_metadata_id_and_size() {
        let dict = BencodeValue::Dict(
            [
                (
                    "m".to_string(),
                    BencodeValue::Dict([("ut_metadata".to_string(), BencodeValue::from(3i64))].into_iter().collect()),
                ),
                ("metadata_size".to_string(), BencodeValue::from(16384i64)),
            ]
            .into_iter()
            .collect(),
        );
        let parsed = PeerExtensionHandshake::try_from(&dict).unwrap();
        assert_eq!(parsed.ut_metadata_id, 3);
        assert_eq!(parsed.metadata_size, 16384);
    }

    #[test]
    fn peer_handshake_without_ut_metadata_is_rejected() {
        let dict = BencodeValue::Dict([("m".to_string(), BencodeValue::Dict(Default::default()))].into_iter().collect());
        assert!(PeerExtensionHandshake::try_from(&dict).is_err());
    }

    fn handshake_dict(ut_metadata_id: i64, metadata_size: i64) -> BencodeValue {
        BencodeValue::Dict(
            [
                (
                    "m".to_string(),
                    BencodeValue::Dict([("ut_metadata".to_string(), BencodeValue::from(ut_metadata_id))].into_iter().collect()),
                ),
                ("metadata_size".to_string(), BencodeValue::from(metadata_size)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn peer_handshake_with_unsupported_sentinel_id_is_rejected() {
        let dict = handshake_dict(0, 16384);
        assert!(PeerExtensionHandshake::try_from(&dict).is_err());
    }

    #[test]
    fn peer_handshake_with_non_positive_metadata_size_is_rejected() {
        let dict = handshake_dict(1, 0);
        assert!(PeerExtensionHandshake::try_from(&dict).is_err());

        let dict = handshake_dict(1, -1);
        assert!(PeerExtensionHandshake::try_from(&dict).is_err());
    }
}
