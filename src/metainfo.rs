//! Parses the bencoded `info` dictionary the metadata pipeline reassembles
//! (spec.md 4.3 step 7) into the fields `DiscoveredTorrent` persists.
//!
//! Only the `info` dict itself crosses the wire via ut_metadata (BEP 9) --
//! `announce`/`comment`/`creation date` live in the outer `.torrent`
//! dict, which some peers do not send. This parser accepts either shape:
//! a bare info dict (the common case) or a full metainfo dict with an
//! `info` key, and fills in whatever of the outer fields are present.
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::bencode::{parse_bencoded, BencodeValue};
use crate::model::FileEntry;

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMetadata {
    pub name: Option<String>,
    pub piece_length: Option<u64>,
    pub piece_count: Option<u32>,
    pub file_count: Option<u32>,
    pub files: Vec<FileEntry>,
    pub private: Option<bool>,
    pub creation_date: Option<i64>,
    pub trackers: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
}

impl ParsedMetadata {
    pub fn size(&self) -> Option<u64> {
        if self.files.is_empty() {
            None
        } else {
            Some(self.files.iter().map(|f| f.length).sum())
        }
    }
}

pub fn parse_metadata(bytes: &[u8]) -> Result<ParsedMetadata> {
    let (value, left) = parse_bencoded(bytes.to_vec());
    let value = value.ok_or_else(|| anyhow!("info dict is not valid bencode"))?;
    if !left.is_empty() {
        return Err(anyhow!("{} trailing bytes after info dict", left.len()));
    }
    let dict = value.as_dict().ok_or_else(|| anyhow!("metadata is not a dict"))?;

    let (info_dict, outer) = match dict.get("info").and_then(|v| v.as_dict()) {
        Some(info) => (info.clone(), Some(dict)),
        None => (dict.clone(), None),
    };

    let name = info_dict.get("name").and_then(|v| v.as_bytes()).map(|b| String::from_utf8_lossy(b).into_owned());
    let piece_length = info_dict.get("piece length").and_then(|v| v.as_int()).map(|v| v as u64);
    let piece_count = match (info_dict.get("pieces").and_then(|v| v.as_bytes()), piece_length) {
        (Some(pieces), _) => Some((pieces.len() / 20) as u32),
        _ => None,
    };
    let private = info_dict.get("private").and_then(|v| v.as_int()).map(|v| v == 1);

    let files = match info_dict.get("files") {
        Some(BencodeValue::List(entries)) => parse_multi_file(entries)?,
        _ => match (name.as_deref(), info_dict.get("length").and_then(|v| v.as_int())) {
            (Some(name), Some(length)) => vec![FileEntry {
                path: PathBuf::from(name),
                length: length as u64,
            }],
            _ => Vec::new(),
        },
    };
    let file_count = if files.is_empty() { None } else { Some(files.len() as u32) };

    let (creation_date, trackers, comment, created_by) = match outer {
        Some(outer) => (
            outer.get("creation date").and_then(|v| v.as_int()),
            collect_trackers(outer),
            outer.get("comment").and_then(|v| v.as_bytes()).map(|b| String::from_utf8_lossy(b).into_owned()),
            outer.get("created by").and_then(|v| v.as_bytes()).map(|b| String::from_utf8_lossy(b).into_owned()),
        ),
        None => (None, Vec::new(), None, None),
    };

    Ok(ParsedMetadata {
        name,
        piece_length,
        piece_count,
        file_count,
        files,
        private,
        creation_date,
        trackers,
        comment,
        created_by,
    })
}

fn parse_multi_file(entries: &[BencodeValue]) -> Result<Vec<FileEntry>> {
    entries
        .iter()
        .map(|entry| {
            let dict = entry.as_dict().ok_or_else(|| anyhow!("'files' entry is not a dict"))?;
            let length = dict.get("length").and_then(|v| v.as_int()).ok_or_else(|| anyhow!("'length' missing"))? as u64;
            let path = match dict.get("path") {
                Some(BencodeValue::List(parts)) => {
                    let mut path = PathBuf::new();
                    for part in parts {
                        let segment = part.as_bytes().ok_or_else(|| anyhow!("path segment not a string"))?;
                        path.push(String::from_utf8_lossy(segment).into_owned());
                    }
                    path
                }
                _ => return Err(anyhow!("'path' missing or not a list")),
            };
            Ok(FileEntry { path, length })
        })
        .collect()
}

fn collect_trackers(outer: &std::collections::BTreeMap<String, BencodeValue>) -> Vec<String> {
    let mut trackers = Vec::new();
    if let Some(announce) = outer.get("announce").and_then(|v| v.as_bytes()) {
        trackers.push(String::from_utf8_lossy(announce).into_owned());
    }
    if let Some(BencodeValue::List(tiers)) = outer.get("announce-list") {
        for tier in tiers {
            if let BencodeValue::List(urls) = tier {
                for url in urls {
                    if let Some(bytes) = url.as_bytes() {
                        let s = String::from_utf8_lossy(bytes).into_owned();
                        if !trackers.contains(&s) {
                            trackers.push(s);
                        }
                    }
                }
            }
        }
    }
    trackers
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bencode::BencodeValue;

    fn single_file_info_dict() -> BencodeValue {
        BencodeValue::Dict(
            [
                ("name".to_string(), BencodeValue::from("ubuntu.iso")),
                ("length".to_string(), BencodeValue::from(16384i64)),
                ("piece length".to_string(), BencodeValue::from(16384i64)),
                ("pieces".to_string(), BencodeValue::String(vec![0u8; 20])),
                ("private".to_string(), BencodeValue::from(0i64)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn parses_bare_single_file_info_dict() {
        let bytes = single_file_info_dict().encode();
        let parsed = parse_metadata(&bytes).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("ubuntu.iso"));
        assert_eq!(parsed.piece_count, Some(1));
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.size(), Some(16384));
        assert_eq!(parsed.private, Some(false));
    }

    #[test]
    fn parses_multi_file_info_dict() {
        let info = BencodeValue::Dict(
            [
                ("name".to_string(), BencodeValue::from("pack")),
                ("piece length".to_string(), BencodeValue::from(16384i64)),
                ("pieces".to_string(), BencodeValue::String(vec![0u8; 40])),
                (
                    "files".to_string(),
                    BencodeValue::List(vec![
                        BencodeValue::Dict(
                            [
                                ("length".to_string(), BencodeValue::from(100i64)),
                                ("path".to_string(), BencodeValue::List(vec![BencodeValue::from("a.txt")])),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                        BencodeValue::Dict(
                            [
                                ("length".to_string(), BencodeValue::from(200i64)),
                                ("path".to_string(), BencodeValue::List(vec![BencodeValue::from("dir"), BencodeValue::from("b.txt")])),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                    ]),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let parsed = parse_metadata(&info.encode()).unwrap();
        assert_eq!(parsed.file_count, Some(2));
        assert_eq!(parsed.size(), Some(300));
        assert_eq!(parsed.files[1].path, PathBuf::from("dir").join("b.txt"));
    }

    #[test]
    fn parses_nested_metainfo_with_trackers() {
        let outer = BencodeValue::Dict(
            [
                ("info".to_string(), single_file_info_dict()),
                ("announce".to_string(), BencodeValue::from("udp://tracker.example:80")),
                ("comment".to_string(), BencodeValue::from("hello")),
            ]
            .into_iter()
            .collect(),
        );
        let parsed = parse_metadata(&outer.encode()).unwrap();
        assert_eq!(parsed.trackers, vec!["udp://tracker.example:80".to_string()]);
        assert_eq!(parsed.comment.as_deref(), Some("hello"));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut bytes = single_file_info_dict().encode();
        bytes.extend_from_slice(b"garbage");
        assert!(parse_metadata(&bytes).is_err());
    }
}
