use anyhow::{ensure, Context, Result};

pub fn hex(str: &[u8]) -> String {
    str.iter().map(|c| format!("{:02x}", c)).collect::<String>()
}

/// Parses a hex string (as typed on the CLI, e.g. `--metadata <hash>`) back
/// into raw bytes. Rejects odd-length input and non-hex characters.
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    ensure!(s.len() % 2 == 0, "hex string has odd length: {}", s.len());
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).with_context(|| format!("invalid hex byte at offset {i}")))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_hex_and_back() {
        let bytes = [0xDEu8, 0xAD, 0xBE, 0xEF];
        assert_eq!(from_hex(&hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn rejects_odd_length() {
        assert!(from_hex("abc").is_err());
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert!(from_hex("zz").is_err());
    }
}
