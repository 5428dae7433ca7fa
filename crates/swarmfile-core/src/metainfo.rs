//! Canonical metainfo: an ordered list of piece hashes plus a total byte
//! length, serialized as a sorted-key bencode-style dictionary. The top hash
//! identifying a session is the sha3-256 digest of these bytes.

use swarmfile_bencode::Value;

use crate::{Error, PieceHash, Result, TopHash};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metainfo {
    pub hashes: Vec<PieceHash>,
    pub length: u64,
}

impl Metainfo {
    pub fn new(hashes: Vec<PieceHash>, length: u64) -> Self {
        Self { hashes, length }
    }

    /// Canonical deterministic serialization: sorted keys, fixed integer and
    /// byte-string encoding.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(
            b"hashes".to_vec(),
            Value::List(
                self.hashes
                    .iter()
                    .map(|h| Value::Bytes(h.to_bytes()))
                    .collect(),
            ),
        );
        map.insert(b"length".to_vec(), Value::Int(self.length));
        Value::Dict(map).encode()
    }

    pub fn from_binary(buf: &[u8]) -> Result<Self> {
        let value = Value::decode(buf)?;
        let length = value.get("length")?.as_int()?;
        let hashes = value
            .get("hashes")?
            .as_list()?
            .iter()
            .map(|v| PieceHash::from_bytes(v.as_bytes()?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { hashes, length })
    }

    pub fn top_hash(&self) -> TopHash {
        TopHash::of(&self.to_binary())
    }

    pub fn validate(&self, piece_size: u32) -> Result<()> {
        let expected_count = self.length.div_ceil(piece_size as u64) as usize;
        if self.hashes.len() != expected_count {
            return Err(Error::MalformedMetainfo(format!(
                "expected {} piece hashes for length {} at piece_size {}, got {}",
                expected_count,
                self.length,
                piece_size,
                self.hashes.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metainfo {
        Metainfo::new(
            vec![PieceHash::of(b"piece0"), PieceHash::of(b"piece1")],
            2 * 524288 + 42,
        )
    }

    #[test]
    fn test_metainfo_roundtrip() {
        let m = sample();
        let bytes = m.to_binary();
        let m2 = Metainfo::from_binary(&bytes).unwrap();
        assert_eq!(m, m2);
        assert_eq!(m.top_hash(), m2.top_hash());
    }

    #[test]
    fn test_top_hash_pure_function_of_bytes() {
        let m = sample();
        let bytes = m.to_binary();
        assert_eq!(TopHash::of(&bytes), m.top_hash());
    }

    #[test]
    fn test_validate_rejects_wrong_hash_count() {
        let m = Metainfo::new(vec![PieceHash::of(b"only-one")], 2 * 524288 + 42);
        assert!(m.validate(524288).is_err());
    }

    #[test]
    fn test_validate_accepts_matching_count() {
        let m = sample();
        assert!(m.validate(524288).is_ok());
    }
}
