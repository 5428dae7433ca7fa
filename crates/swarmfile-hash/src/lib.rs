// Wrapper around the hash functions used for piece and top-hash digests,
// kept in one crate so the chosen backends can be swapped without touching
// callers.

pub const BLAKE2B_DIGEST_LEN: usize = 32;
pub const SHA3_256_DIGEST_LEN: usize = 32;

pub trait Hasher: Sized {
    const DIGEST_LEN: usize;
    fn new() -> Self;
    fn update(&mut self, buf: &[u8]);
    fn finish(self) -> Vec<u8>;
}

pub struct Blake2b256 {
    inner: blake2::Blake2b<blake2::digest::consts::U32>,
}

impl Hasher for Blake2b256 {
    const DIGEST_LEN: usize = BLAKE2B_DIGEST_LEN;

    fn new() -> Self {
        use blake2::Digest;
        Self {
            inner: blake2::Blake2b::new(),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        use blake2::Digest;
        Digest::update(&mut self.inner, buf);
    }

    fn finish(self) -> Vec<u8> {
        use blake2::Digest;
        self.inner.finalize().to_vec()
    }
}

pub struct Sha3_256 {
    inner: sha3::Sha3_256,
}

impl Hasher for Sha3_256 {
    const DIGEST_LEN: usize = SHA3_256_DIGEST_LEN;

    fn new() -> Self {
        use sha3::Digest;
        Self {
            inner: sha3::Sha3_256::new(),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        use sha3::Digest;
        Digest::update(&mut self.inner, buf);
    }

    fn finish(self) -> Vec<u8> {
        use sha3::Digest;
        self.inner.finalize().to_vec()
    }
}

pub fn blake2b256(data: &[u8]) -> [u8; BLAKE2B_DIGEST_LEN] {
    let mut h = Blake2b256::new();
    h.update(data);
    let v = h.finish();
    let mut out = [0u8; BLAKE2B_DIGEST_LEN];
    out.copy_from_slice(&v);
    out
}

pub fn sha3_256(data: &[u8]) -> [u8; SHA3_256_DIGEST_LEN] {
    let mut h = Sha3_256::new();
    h.update(data);
    let v = h.finish();
    let mut out = [0u8; SHA3_256_DIGEST_LEN];
    out.copy_from_slice(&v);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2b256_deterministic() {
        assert_eq!(blake2b256(b"hello"), blake2b256(b"hello"));
        assert_ne!(blake2b256(b"hello"), blake2b256(b"world"));
    }

    #[test]
    fn test_sha3_256_deterministic() {
        assert_eq!(sha3_256(b"hello"), sha3_256(b"hello"));
        assert_ne!(sha3_256(b"hello"), sha3_256(b"world"));
    }
}
