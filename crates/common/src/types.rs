use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle for a chunk owned by the surrounding engine.
///
/// The index never owns chunk data. It only keeps these handles in its cells
/// and hands them back to the host when it needs a position or a
/// materialization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Eight hex digits are plenty to tell chunks apart in logs.
        let s = self.0.simple().to_string();
        write!(f, "chunk:{}", &s[..8])
    }
}
