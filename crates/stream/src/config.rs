use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Space configuration: cell resolution, neighborhood window and focus reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    /// Edge length of one grid cell, in world units.
    pub resolution: f32,
    /// Half-width (in cells) of the window a chunk registers into. 1 gives 3x3.
    pub neighbor_radius: i32,
    /// Half-width (in cells) of the bounds covered around the focus point.
    pub focus_range: i32,
    /// Extra passes a chunk that keeps re-queueing itself gets within one drain.
    pub retry_limit: u32,
    /// Most cells the grid may hold at once. Bounds past this are rejected.
    pub max_cells: usize,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            resolution: 100.0,
            neighbor_radius: 1,
            focus_range: 30,
            retry_limit: 8,
            max_cells: 1 << 20,
        }
    }
}

impl SpaceConfig {
    /// Config with the given resolution and every other field at its default.
    pub fn with_resolution(resolution: f32) -> Self {
        Self {
            resolution,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }
        if self.neighbor_radius < 0 {
            return Err(ConfigError::NegativeRadius(self.neighbor_radius));
        }
        if self.focus_range < 0 {
            return Err(ConfigError::NegativeFocusRange(self.focus_range));
        }
        self.check_window("neighbor radius", self.neighbor_radius)?;
        self.check_window("focus range", self.focus_range)?;
        Ok(())
    }

    fn check_window(&self, field: &'static str, range: i32) -> Result<(), ConfigError> {
        let cells = window_cells(range);
        if cells > self.max_cells as u64 {
            return Err(ConfigError::WindowTooLarge {
                field,
                range,
                cells,
                max: self.max_cells,
            });
        }
        Ok(())
    }
}

/// Cells in a `(2r+1) x (2r+1)` window. Saturates instead of overflowing.
fn window_cells(range: i32) -> u64 {
    let side = 2 * u64::from(range.unsigned_abs()) + 1;
    side.saturating_mul(side)
}
