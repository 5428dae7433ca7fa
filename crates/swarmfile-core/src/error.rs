#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("content with 0 length is useless")]
    ZeroLength,
    #[error("invalid piece index {0}")]
    InvalidPieceIndex(u32),
    #[error("unsupported hash kind tag {0}")]
    UnsupportedHashKind(u8),
    #[error("hash digest has wrong length: expected {expected}, got {actual}")]
    WrongDigestLength { expected: usize, actual: usize },
    #[error("malformed metainfo: {0}")]
    MalformedMetainfo(String),
    #[error(transparent)]
    Bencode(#[from] swarmfile_bencode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
