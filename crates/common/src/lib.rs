//! Shared types for the chunkspace workspace.

mod types;

pub use types::ChunkId;
