//! Piece selection and progress tracking for multi-source segmented
//! downloads: rarest-first picking, in-flight piece bookkeeping and
//! have-advertisement fan-out for swarm clients.

pub mod bitfield;
pub mod config;
pub mod context;
pub mod disk;
pub mod error;
pub mod events;
pub mod have_log;
pub mod peer;
pub mod piece;
pub mod rarity;
pub mod storage;

pub use config::{Config, StorageConfig};
pub use context::{DownloadContext, FileMode, FileSpec};
pub use error::StorageError;
pub use events::Event;
pub use peer::Peer;
pub use piece::{Piece, BLOCK_LENGTH};
pub use storage::PieceStorage;
