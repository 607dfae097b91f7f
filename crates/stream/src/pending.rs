use std::collections::{HashSet, VecDeque};

use chunkspace_common::ChunkId;

/// Chunks waiting for a visibility recompute.
///
/// A FIFO with set semantics: a chunk is queued at most once at a time.
/// Pushing a chunk that was already popped queues it again at the back, which
/// is how a chunk that failed to materialize asks to be retried.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    order: VecDeque<ChunkId>,
    queued: HashSet<ChunkId>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `chunk` at the back. Returns `false` if it was already queued.
    pub fn push(&mut self, chunk: ChunkId) -> bool {
        if self.queued.insert(chunk) {
            self.order.push_back(chunk);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<ChunkId> {
        let chunk = self.order.pop_front()?;
        self.queued.remove(&chunk);
        Some(chunk)
    }

    /// Remove `chunk` wherever it sits in the queue.
    pub fn remove(&mut self, chunk: ChunkId) -> bool {
        if self.queued.remove(&chunk) {
            self.order.retain(|c| *c != chunk);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, chunk: ChunkId) -> bool {
        self.queued.contains(&chunk)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Queued chunks, front first.
    pub fn iter(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.order.iter().copied()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.queued.clear();
    }
}

impl Extend<ChunkId> for PendingQueue {
    fn extend<T: IntoIterator<Item = ChunkId>>(&mut self, iter: T) {
        for chunk in iter {
            self.push(chunk);
        }
    }
}
