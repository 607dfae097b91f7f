use serde::{Deserialize, Serialize};

use crate::grid::{CellCoord, GridRect};

/// Square window of cells around a chunk's home cell.
///
/// With the default radius of 1 this is the home cell plus its 8 neighbours.
/// The radius is a design constant of the index and is not derived from the
/// chunk's extent; chunks are assumed to fit inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Neighborhood {
    pub home: CellCoord,
    pub radius: i32,
}

impl Neighborhood {
    pub fn new(home: CellCoord, radius: i32) -> Self {
        Self { home, radius }
    }

    pub fn min(&self) -> CellCoord {
        CellCoord::new(
            self.home.x.saturating_sub(self.radius),
            self.home.z.saturating_sub(self.radius),
        )
    }

    pub fn max(&self) -> CellCoord {
        CellCoord::new(
            self.home.x.saturating_add(self.radius),
            self.home.z.saturating_add(self.radius),
        )
    }

    pub fn contains(&self, coord: CellCoord) -> bool {
        let (min, max) = (self.min(), self.max());
        (min.x..=max.x).contains(&coord.x) && (min.z..=max.z).contains(&coord.z)
    }

    /// True if any coordinate of the window lies inside `rect`.
    pub fn overlaps(&self, rect: &GridRect) -> bool {
        if rect.is_empty() {
            return false;
        }
        let (min, max) = (self.min(), self.max());
        let rx1 = i64::from(rect.origin.x) + i64::from(rect.width) - 1;
        let rz1 = i64::from(rect.origin.z) + i64::from(rect.height) - 1;
        i64::from(min.x) <= rx1
            && i64::from(max.x) >= i64::from(rect.origin.x)
            && i64::from(min.z) <= rz1
            && i64::from(max.z) >= i64::from(rect.origin.z)
    }

    /// Every coordinate of the window exactly once, x fastest.
    pub fn coords(&self) -> impl Iterator<Item = CellCoord> {
        let (min, max) = (self.min(), self.max());
        (min.z..=max.z).flat_map(move |z| (min.x..=max.x).map(move |x| CellCoord::new(x, z)))
    }
}
