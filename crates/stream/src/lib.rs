//! Streaming: the focus grid that tracks which chunks each cell can see.
//!
//! A [`Space`] owns a dense, resizable [`Grid`] of [`Cell`]s around the
//! focus point and a [`PendingQueue`] of chunks whose visibility must be
//! recomputed. Chunks themselves live in the engine and are reached through
//! the [`ChunkHost`] trait.
//!
//! # Invariants
//! - A resident cell sees a chunk iff the chunk's neighborhood covers it.
//! - Resizing never disturbs cells that stay in bounds.
//! - Each (chunk, cell) visibility change happens, and is logged, once.

mod cell;
mod config;
mod error;
mod grid;
mod neighborhood;
mod pending;
mod space;

pub use cell::Cell;
pub use config::SpaceConfig;
pub use error::{ConfigError, GridError, SpaceError};
pub use grid::{CellCoord, Grid, GridRect, position_to_cell};
pub use neighborhood::Neighborhood;
pub use pending::PendingQueue;
pub use space::{ChunkHost, DrainStats, ResizeStats, Space, SpaceStats, VisibilityChange};

pub fn crate_info() -> &'static str {
    "chunkspace-stream v0.1.0"
}
