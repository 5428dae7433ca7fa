//! Self-describing hash values: a one-byte function tag followed by the
//! digest bytes, so that an alternate hash function can be introduced later
//! without breaking wire compatibility with peers still using the default.

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HashKind {
    Blake2b256 = 0,
    Sha3_256 = 1,
}

impl HashKind {
    pub const fn digest_len(self) -> usize {
        match self {
            HashKind::Blake2b256 => swarmfile_hash::BLAKE2B_DIGEST_LEN,
            HashKind::Sha3_256 => swarmfile_hash::SHA3_256_DIGEST_LEN,
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(HashKind::Blake2b256),
            1 => Some(HashKind::Sha3_256),
            _ => None,
        }
    }
}

/// A self-describing hash value: `kind` tag plus digest bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SelfDescribingHash {
    kind: HashKind,
    digest: Vec<u8>,
}

impl SelfDescribingHash {
    pub fn new(kind: HashKind, digest: Vec<u8>) -> crate::Result<Self> {
        if digest.len() != kind.digest_len() {
            return Err(Error::WrongDigestLength {
                expected: kind.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(Self { kind, digest })
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Wire/on-disk encoding: one tag byte followed by the digest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.digest.len());
        out.push(self.kind.tag());
        out.extend_from_slice(&self.digest);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> crate::Result<Self> {
        let (&tag, digest) = buf
            .split_first()
            .ok_or_else(|| Error::MalformedMetainfo("empty hash bytes".into()))?;
        let kind = HashKind::from_tag(tag).ok_or(Error::UnsupportedHashKind(tag))?;
        Self::new(kind, digest.to_vec())
    }
}

impl std::fmt::Debug for SelfDescribingHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.kind, hex::encode(&self.digest))
    }
}

/// A piece hash, blake2b-256 by default.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PieceHash(SelfDescribingHash);

impl PieceHash {
    pub fn of(data: &[u8]) -> Self {
        Self(SelfDescribingHash {
            kind: HashKind::Blake2b256,
            digest: swarmfile_hash::blake2b256(data).to_vec(),
        })
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        match self.0.kind {
            HashKind::Blake2b256 => swarmfile_hash::blake2b256(data).as_slice() == self.digest(),
            HashKind::Sha3_256 => swarmfile_hash::sha3_256(data).as_slice() == self.digest(),
        }
    }

    pub fn kind(&self) -> HashKind {
        self.0.kind()
    }

    pub fn digest(&self) -> &[u8] {
        self.0.digest()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> crate::Result<Self> {
        Ok(Self(SelfDescribingHash::from_bytes(buf)?))
    }
}

impl std::fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The top hash identifying a session: sha3-256 of the canonical metainfo bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopHash(SelfDescribingHash);

impl TopHash {
    pub fn of(metainfo_bytes: &[u8]) -> Self {
        Self(SelfDescribingHash {
            kind: HashKind::Sha3_256,
            digest: swarmfile_hash::sha3_256(metainfo_bytes).to_vec(),
        })
    }

    pub fn digest(&self) -> &[u8] {
        self.0.digest()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> crate::Result<Self> {
        Ok(Self(SelfDescribingHash::from_bytes(buf)?))
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl std::fmt::Debug for TopHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for TopHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_hash_roundtrip() {
        let h = PieceHash::of(b"some piece bytes");
        let bytes = h.to_bytes();
        let h2 = PieceHash::from_bytes(&bytes).unwrap();
        assert_eq!(h, h2);
        assert!(h.verify(b"some piece bytes"));
        assert!(!h.verify(b"different bytes"));
    }

    #[test]
    fn test_top_hash_roundtrip() {
        let h = TopHash::of(b"metainfo bytes");
        let bytes = h.to_bytes();
        let h2 = TopHash::from_bytes(&bytes).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn test_unsupported_kind_rejected() {
        let mut bytes = PieceHash::of(b"x").to_bytes();
        bytes[0] = 0xff;
        assert!(PieceHash::from_bytes(&bytes).is_err());
    }
}
