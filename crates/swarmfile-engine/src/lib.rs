//! The swarm engine: per-content session state, in-flight piece tracking,
//! the protocol state machine, and the pluggable choking / piece-selection
//! strategies that drive it.

pub mod choking;
pub mod chunk_stream;
pub mod config;
pub mod engine;
pub mod error;
pub mod hashed_file;
pub mod pending_piece;
pub mod piece_selection;
pub mod rate;
pub mod session;

pub use config::SwarmConfig;
pub use engine::{Outbound, SwarmEngine};
pub use error::{Error, Result};
pub use hashed_file::HashedFile;
pub use pending_piece::PendingPiece;
pub use session::{FileSession, FileSessionPeer, PeerId};
