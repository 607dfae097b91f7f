use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chunkspace_common::ChunkId;

use crate::grid::CellCoord;

/// One slot of the focus grid.
///
/// A cell remembers every chunk whose neighborhood covers it. Each entry is
/// either open (the chunk is seen by this cell) or shut, which only happens
/// while the owning [`Space`](crate::Space) re-evaluates that chunk. A shut
/// entry is either reopened or discarded before the chunk's processing ends.
#[derive(Debug)]
pub struct Cell {
    coord: CellCoord,
    serial: u64,
    seen: HashMap<ChunkId, bool>,
}

impl Cell {
    pub(crate) fn new(coord: CellCoord, serial: u64) -> Self {
        Self {
            coord,
            serial,
            seen: HashMap::new(),
        }
    }

    /// Coordinate this cell was built for.
    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    /// Grid-unique construction number. Two lookups returning the same serial
    /// observed the same cell object.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Open the cell to `chunk` and record it as seen.
    ///
    /// Returns `true` only for a genuinely new sighting. Reopening an entry
    /// that was shut by [`shut_if_seen`](Self::shut_if_seen) returns `false`,
    /// as does opening an already seen chunk.
    pub fn open_and_see(&mut self, chunk: ChunkId) -> bool {
        match self.seen.entry(chunk) {
            Entry::Occupied(mut e) => {
                e.insert(true);
                false
            }
            Entry::Vacant(e) => {
                e.insert(true);
                true
            }
        }
    }

    /// Shut the cell to `chunk` if it has been seen. No-op otherwise.
    pub fn shut_if_seen(&mut self, chunk: ChunkId) -> bool {
        match self.seen.get_mut(&chunk) {
            Some(open) if *open => {
                *open = false;
                true
            }
            _ => false,
        }
    }

    /// Drop `chunk` if it is still shut.
    pub fn discard_shut(&mut self, chunk: ChunkId) -> bool {
        if self.seen.get(&chunk) == Some(&false) {
            self.seen.remove(&chunk);
            true
        } else {
            false
        }
    }

    /// Drop `chunk` whatever its state.
    pub fn forget(&mut self, chunk: ChunkId) -> bool {
        self.seen.remove(&chunk).is_some()
    }

    pub fn has_seen(&self, chunk: ChunkId) -> bool {
        self.seen.get(&chunk).copied().unwrap_or(false)
    }

    /// Chunks currently seen by this cell, in no particular order.
    pub fn seen_chunks(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.seen
            .iter()
            .filter(|(_, open)| **open)
            .map(|(id, _)| *id)
    }

    /// Number of chunks known to this cell, shut entries included.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
