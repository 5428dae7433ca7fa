#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed bitmap: {0}")]
    MalformedBitmap(String),
    #[error("i/o error on backing file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] swarmfile_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
