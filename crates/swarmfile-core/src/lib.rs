mod error;
pub mod hash;
pub mod lengths;
pub mod metainfo;

pub use error::Error;
pub use hash::{HashKind, PieceHash, TopHash};

pub type Result<T> = std::result::Result<T, Error>;
