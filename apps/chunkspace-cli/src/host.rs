use std::collections::{BTreeMap, HashSet};

use chunkspace_common::ChunkId;
use chunkspace_stream::{ChunkHost, PendingQueue};
use glam::Vec3;

/// Stand-in for the engine's chunk loader: a square lattice of chunk centres.
///
/// Every `flaky`-th chunk fails its first materialization and re-queues
/// itself, the way a chunk still waiting on its data would.
pub struct LatticeHost {
    centres: BTreeMap<ChunkId, Vec3>,
    flaky: HashSet<ChunkId>,
    pub materializations: usize,
}

impl LatticeHost {
    pub fn new(side: usize, spacing: f32, flaky: usize) -> Self {
        let mut centres = BTreeMap::new();
        let mut flaky_ids = HashSet::new();
        let half = side as f32 * spacing / 2.0;
        for i in 0..side * side {
            let id = ChunkId::new();
            let x = (i % side) as f32 * spacing - half + spacing / 2.0;
            let z = (i / side) as f32 * spacing - half + spacing / 2.0;
            centres.insert(id, Vec3::new(x, 0.0, z));
            if flaky > 0 && i % flaky == 0 {
                flaky_ids.insert(id);
            }
        }
        Self {
            centres,
            flaky: flaky_ids,
            materializations: 0,
        }
    }

    pub fn chunks(&self) -> impl Iterator<Item = (ChunkId, Vec3)> + '_ {
        self.centres.iter().map(|(id, pos)| (*id, *pos))
    }

    pub fn len(&self) -> usize {
        self.centres.len()
    }
}

impl ChunkHost for LatticeHost {
    fn centre(&self, chunk: ChunkId) -> Option<Vec3> {
        self.centres.get(&chunk).copied()
    }

    fn materialize(&mut self, chunk: ChunkId, pending: &mut PendingQueue) {
        self.materializations += 1;
        if self.flaky.remove(&chunk) {
            tracing::debug!(%chunk, "materialization failed, retrying");
            pending.push(chunk);
        }
    }
}

/// Host with hand-placed chunks, used by the scenario replay.
#[derive(Default)]
pub struct ScriptedHost {
    centres: BTreeMap<ChunkId, Vec3>,
}

impl ScriptedHost {
    pub fn place(&mut self, chunk: ChunkId, pos: Vec3) {
        self.centres.insert(chunk, pos);
    }
}

impl ChunkHost for ScriptedHost {
    fn centre(&self, chunk: ChunkId) -> Option<Vec3> {
        self.centres.get(&chunk).copied()
    }

    fn materialize(&mut self, _chunk: ChunkId, _pending: &mut PendingQueue) {}
}
