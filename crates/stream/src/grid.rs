use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::GridError;

/// A 2D cell coordinate in the world grid (ignoring Y axis for partitioning).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for CellCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Convert a world position to the cell containing it.
///
/// Uses floor division so that negative positions land in negative cells:
/// `-0.5 * resolution` is in cell `-1`, not `0`.
pub fn position_to_cell(pos: glam::Vec3, resolution: f32) -> CellCoord {
    CellCoord {
        x: (pos.x / resolution).floor() as i32,
        z: (pos.z / resolution).floor() as i32,
    }
}

/// Half-open rectangle of cell coordinates covered by a [`Grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridRect {
    pub origin: CellCoord,
    pub width: u32,
    pub height: u32,
}

impl GridRect {
    pub fn new(origin: CellCoord, width: u32, height: u32) -> Self {
        Self {
            origin,
            width,
            height,
        }
    }

    /// Rect spanning `[min.x, max.x] x [min.z, max.z]`, both ends inclusive.
    ///
    /// An inverted corner pair gives an empty rect anchored at `min`.
    pub fn from_inclusive(min: CellCoord, max: CellCoord) -> Result<Self, GridError> {
        let span = |axis: char, lo: i32, hi: i32| -> Result<u32, GridError> {
            let span = (i64::from(hi) - i64::from(lo) + 1).max(0);
            u32::try_from(span).map_err(|_| GridError::BoundsTooLarge { axis, span })
        };
        Ok(Self {
            origin: min,
            width: span('x', min.x, max.x)?,
            height: span('z', min.z, max.z)?,
        })
    }

    /// Number of cells in the rect.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Cell count without going through `usize`; never overflows.
    pub fn cell_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        self.index_of(coord).is_some()
    }

    /// Row-major slot of `coord`, or `None` when it lies outside.
    pub fn index_of(&self, coord: CellCoord) -> Option<usize> {
        let dx = i64::from(coord.x) - i64::from(self.origin.x);
        let dz = i64::from(coord.z) - i64::from(self.origin.z);
        if dx < 0 || dz < 0 || dx >= i64::from(self.width) || dz >= i64::from(self.height) {
            return None;
        }
        Some(dx as usize + self.width as usize * dz as usize)
    }

    /// All coordinates in row-major order (x fastest).
    pub fn coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        let (ox, oz) = (i64::from(self.origin.x), i64::from(self.origin.z));
        (0..i64::from(self.height)).flat_map(move |dz| {
            (0..i64::from(self.width))
                .map(move |dx| CellCoord::new((ox + dx) as i32, (oz + dz) as i32))
        })
    }
}

/// Dense, resizable rectangle of [`Cell`]s.
///
/// Cells are stored by value in a row-major `Vec`. Resizing moves the cells
/// that stay in bounds into the new layout and hands the rest back to the
/// caller, so nothing is ever freed by hand.
#[derive(Debug, Default)]
pub struct Grid {
    rect: GridRect,
    cells: Vec<Cell>,
    next_serial: u64,
}

impl Grid {
    /// Create an empty grid covering no cells.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a grid covering `rect`, every cell empty.
    pub fn with_rect(rect: GridRect) -> Self {
        let mut grid = Self::new();
        let evicted = grid.resize(rect);
        debug_assert!(evicted.is_empty());
        grid
    }

    pub fn rect(&self) -> GridRect {
        self.rect
    }

    /// Number of resident cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        self.rect.contains(coord)
    }

    /// Cell at `coord`, or `None` outside the current bounds.
    pub fn cell_at(&self, coord: CellCoord) -> Option<&Cell> {
        self.rect.index_of(coord).map(|i| &self.cells[i])
    }

    pub fn cell_at_mut(&mut self, coord: CellCoord) -> Option<&mut Cell> {
        self.rect.index_of(coord).map(move |i| &mut self.cells[i])
    }

    /// Iterate over resident cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    /// Move the grid to cover `rect`.
    ///
    /// Cells whose coordinate is inside both the old and new rect keep their
    /// identity and contents. Newly covered coordinates get fresh empty cells.
    /// Cells that fall outside are returned; they are released when the
    /// caller drops them.
    pub fn resize(&mut self, rect: GridRect) -> Vec<Cell> {
        let old_rect = self.rect;
        let mut old: Vec<Option<Cell>> = std::mem::take(&mut self.cells)
            .into_iter()
            .map(Some)
            .collect();

        let mut cells = Vec::with_capacity(rect.area());
        for coord in rect.coords() {
            let kept = old_rect.index_of(coord).and_then(|i| old[i].take());
            let cell = match kept {
                Some(cell) => cell,
                None => {
                    self.next_serial += 1;
                    Cell::new(coord, self.next_serial)
                }
            };
            cells.push(cell);
        }

        self.rect = rect;
        self.cells = cells;
        old.into_iter().flatten().collect()
    }
}
