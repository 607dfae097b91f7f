/// Rejected [`SpaceConfig`](crate::SpaceConfig) values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("cell resolution must be finite and positive, got {0}")]
    InvalidResolution(f32),
    #[error("neighbor radius must not be negative, got {0}")]
    NegativeRadius(i32),
    #[error("focus range must not be negative, got {0}")]
    NegativeFocusRange(i32),
    #[error("{field} {range} spans {cells} cells, more than the {max} allowed")]
    WindowTooLarge {
        field: &'static str,
        range: i32,
        cells: u64,
        max: usize,
    },
}

/// Errors from building grid bounds.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("grid span {span} along {axis} does not fit in a u32")]
    BoundsTooLarge { axis: char, span: i64 },
    #[error("grid bounds cover {cells} cells, more than the {max} allowed")]
    TooManyCells { cells: u64, max: usize },
}

/// Errors surfaced by [`Space`](crate::Space) construction and bounds updates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpaceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid grid bounds: {0}")]
    Grid(#[from] GridError),
}
