use std::collections::HashMap;
use std::time::{Duration, Instant};

use chunkspace_common::ChunkId;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::config::SpaceConfig;
use crate::error::{GridError, SpaceError};
use crate::grid::{CellCoord, Grid, GridRect, position_to_cell};
use crate::neighborhood::Neighborhood;
use crate::pending::PendingQueue;

/// The engine-side owner of chunks, as seen by a [`Space`].
///
/// The space never holds chunk data. It asks the host for a chunk's centre
/// when it needs one and calls back into it to materialize a chunk.
pub trait ChunkHost {
    /// Current centre of `chunk`, or `None` if the host no longer knows it.
    fn centre(&self, chunk: ChunkId) -> Option<Vec3>;

    /// Bring `chunk` into a usable state.
    ///
    /// On failure the host pushes `chunk` back onto `pending`; it is retried
    /// within the same drain.
    fn materialize(&mut self, chunk: ChunkId, pending: &mut PendingQueue);
}

/// One (chunk, cell) visibility transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityChange {
    /// The cell started seeing the chunk.
    Entered { chunk: ChunkId, cell: CellCoord },
    /// The cell stopped seeing the chunk, or was dropped from the grid.
    Left { chunk: ChunkId, cell: CellCoord },
}

/// Statistics from one [`Space::drain_pending`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainStats {
    /// Materialization passes run, retries included.
    pub processed: usize,
    /// Passes for chunks that had already been processed in this drain.
    pub retried: usize,
    /// Chunks carried over to the next drain after exhausting their retries.
    pub deferred: usize,
    pub entered: usize,
    pub left: usize,
    pub elapsed: Duration,
}

/// Statistics from one grid bounds change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResizeStats {
    pub kept: usize,
    pub created: usize,
    pub evicted: usize,
    /// Registrations restored onto newly covered cells.
    pub reopened: usize,
}

/// Current totals of the space, plus the stats of its last drain and resize.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpaceStats {
    pub last_drain: DrainStats,
    pub last_resize: ResizeStats,
    pub registered_chunks: usize,
    pub resident_cells: usize,
    pub pending_chunks: usize,
}

/// Streaming state for one continuous world.
///
/// Owns the focus [`Grid`] and the queue of chunks whose visibility must be
/// recomputed, and keeps every resident cell's back-references in step with
/// the chunks' neighborhoods.
///
/// # Invariants
/// - A resident cell sees a chunk iff the chunk's registered neighborhood
///   covers the cell's coordinate.
/// - No shut entry outlives the processing of its chunk.
/// - Each (chunk, cell) state change is logged exactly once.
pub struct Space {
    config: SpaceConfig,
    grid: Grid,
    pending: PendingQueue,
    registered: HashMap<ChunkId, Neighborhood>,
    changes: Vec<VisibilityChange>,
    stats: SpaceStats,
}

impl Space {
    pub fn new(config: SpaceConfig) -> Result<Self, SpaceError> {
        config.validate()?;
        Ok(Self {
            config,
            grid: Grid::new(),
            pending: PendingQueue::new(),
            registered: HashMap::new(),
            changes: Vec::new(),
            stats: SpaceStats::default(),
        })
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Statistics from the last drain and resize.
    pub fn stats(&self) -> &SpaceStats {
        &self.stats
    }

    /// Cell containing a world position.
    pub fn home_cell(&self, pos: Vec3) -> CellCoord {
        position_to_cell(pos, self.config.resolution)
    }

    /// Neighborhood a chunk centred at `pos` registers into.
    pub fn neighborhood_at(&self, pos: Vec3) -> Neighborhood {
        Neighborhood::new(self.home_cell(pos), self.config.neighbor_radius)
    }

    /// Last neighborhood `chunk` was registered into.
    pub fn neighborhood_of(&self, chunk: ChunkId) -> Option<Neighborhood> {
        self.registered.get(&chunk).copied()
    }

    pub fn is_registered(&self, chunk: ChunkId) -> bool {
        self.registered.contains_key(&chunk)
    }

    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    pub fn cell_at(&self, coord: CellCoord) -> Option<&Cell> {
        self.grid.cell_at(coord)
    }

    /// Chunks seen from the cell at `coord`, sorted. Empty outside the grid.
    pub fn visible_from(&self, coord: CellCoord) -> Vec<ChunkId> {
        let mut chunks: Vec<ChunkId> = self
            .grid
            .cell_at(coord)
            .map(|cell| cell.seen_chunks().collect())
            .unwrap_or_default();
        chunks.sort();
        chunks
    }

    /// Read-only access to the visibility change log.
    pub fn changes(&self) -> &[VisibilityChange] {
        &self.changes
    }

    /// Drain and return the visibility change log.
    pub fn drain_changes(&mut self) -> Vec<VisibilityChange> {
        std::mem::take(&mut self.changes)
    }

    /// Queue `chunk` for a visibility recompute. Returns `false` if it was
    /// already queued.
    pub fn enqueue(&mut self, chunk: ChunkId) -> bool {
        let queued = self.pending.push(chunk);
        self.refresh_totals();
        queued
    }

    /// Recompute visibility for every queued chunk.
    ///
    /// Each chunk is shut in the cells of its last registered neighborhood,
    /// materialized by the host, then opened in the cells of the
    /// neighborhood around its (possibly new) centre. Chunks the host pushes
    /// back during materialization are processed again before this returns,
    /// up to `retry_limit` extra passes each; past that they stay queued for
    /// the next drain.
    pub fn drain_pending<H: ChunkHost + ?Sized>(&mut self, host: &mut H) -> DrainStats {
        let _span = tracing::info_span!("drain_pending", queued = self.pending.len()).entered();
        let start = Instant::now();

        let mut stats = DrainStats::default();
        let mut passes: HashMap<ChunkId, u32> = HashMap::new();
        let mut deferred: Vec<ChunkId> = Vec::new();

        while let Some(chunk) = self.pending.pop() {
            let pass = passes.entry(chunk).or_insert(0);
            if *pass > self.config.retry_limit {
                if !deferred.contains(&chunk) {
                    tracing::warn!(
                        %chunk,
                        passes = *pass,
                        "chunk still failing, deferring to next drain"
                    );
                    deferred.push(chunk);
                }
                continue;
            }
            if *pass > 0 {
                stats.retried += 1;
            }
            *pass += 1;

            let (entered, left) = self.refocus(chunk, host);
            stats.processed += 1;
            stats.entered += entered;
            stats.left += left;
        }

        stats.deferred = deferred.len();
        self.pending.extend(deferred);
        stats.elapsed = start.elapsed();

        tracing::trace!(
            processed = stats.processed,
            retried = stats.retried,
            deferred = stats.deferred,
            entered = stats.entered,
            left = stats.left,
            "drain complete"
        );

        self.stats.last_drain = stats.clone();
        self.refresh_totals();
        stats
    }

    /// One shut / materialize / open pass for `chunk`. Returns the number of
    /// cells it entered and left.
    fn refocus<H: ChunkHost + ?Sized>(&mut self, chunk: ChunkId, host: &mut H) -> (usize, usize) {
        let old = match self.registered.get(&chunk) {
            Some(n) => Some(*n),
            None => host.centre(chunk).map(|pos| self.neighborhood_at(pos)),
        };

        // Shut before materializing so the chunk never finds itself already
        // visible in the cells it is being re-evaluated for.
        if let Some(old) = &old {
            for coord in old.coords() {
                if let Some(cell) = self.grid.cell_at_mut(coord) {
                    cell.shut_if_seen(chunk);
                }
            }
        }

        host.materialize(chunk, &mut self.pending);

        let new = host.centre(chunk).map(|pos| self.neighborhood_at(pos));
        let entered = match &new {
            Some(new) => self.open_window(chunk, new),
            None => {
                tracing::warn!(%chunk, "chunk vanished during materialization");
                0
            }
        };

        let mut left = 0;
        if let Some(old) = &old {
            for coord in old.coords() {
                if let Some(cell) = self.grid.cell_at_mut(coord) {
                    if cell.discard_shut(chunk) {
                        self.changes.push(VisibilityChange::Left { chunk, cell: coord });
                        left += 1;
                    }
                }
            }
        }

        match new {
            Some(new) => {
                tracing::debug!(%chunk, home = %new.home, entered, left, "chunk refocused");
                self.registered.insert(chunk, new);
            }
            None => {
                self.registered.remove(&chunk);
            }
        }
        (entered, left)
    }

    /// Open every resident cell of `window` to `chunk`. Returns the number of
    /// new sightings.
    fn open_window(&mut self, chunk: ChunkId, window: &Neighborhood) -> usize {
        let mut entered = 0;
        for coord in window.coords() {
            if let Some(cell) = self.grid.cell_at_mut(coord) {
                if cell.open_and_see(chunk) {
                    self.changes
                        .push(VisibilityChange::Entered { chunk, cell: coord });
                    entered += 1;
                }
            }
        }
        entered
    }

    /// Mark `chunk` as seen by every resident cell around its current centre,
    /// without a materialization pass.
    ///
    /// Calling this again with no movement in between changes nothing. If the
    /// chunk was registered elsewhere, cells outside the new window stop
    /// seeing it. Returns the number of new sightings.
    pub fn notice_chunk_near_focus<H: ChunkHost + ?Sized>(
        &mut self,
        host: &H,
        chunk: ChunkId,
    ) -> usize {
        let Some(pos) = host.centre(chunk) else {
            tracing::debug!(%chunk, "ignoring notice for unknown chunk");
            return 0;
        };
        let window = self.neighborhood_at(pos);
        let entered = self.open_window(chunk, &window);

        if let Some(old) = self.registered.insert(chunk, window) {
            if old != window {
                for coord in old.coords().filter(|c| !window.contains(*c)) {
                    if let Some(cell) = self.grid.cell_at_mut(coord) {
                        if cell.forget(chunk) {
                            self.changes.push(VisibilityChange::Left { chunk, cell: coord });
                        }
                    }
                }
            }
        }
        self.refresh_totals();
        entered
    }

    /// Remove every trace of `chunk` before the host disposes of it.
    ///
    /// Drops it from the pending queue and from every resident cell of its
    /// last registered neighborhood. Returns `false` if the space knew
    /// nothing about it.
    pub fn forget_chunk(&mut self, chunk: ChunkId) -> bool {
        let queued = self.pending.remove(chunk);
        let Some(old) = self.registered.remove(&chunk) else {
            self.refresh_totals();
            return queued;
        };
        for coord in old.coords() {
            if let Some(cell) = self.grid.cell_at_mut(coord) {
                if cell.forget(chunk) {
                    self.changes.push(VisibilityChange::Left { chunk, cell: coord });
                }
            }
        }
        tracing::debug!(%chunk, home = %old.home, "chunk forgotten");
        self.refresh_totals();
        true
    }

    /// Cover `[min.x, max.x] x [min.z, max.z]` (inclusive) with the grid.
    ///
    /// Bounds holding more than `max_cells` cells are rejected and leave the
    /// grid as it was.
    pub fn set_bounds(
        &mut self,
        min: CellCoord,
        max: CellCoord,
    ) -> Result<ResizeStats, SpaceError> {
        let rect = GridRect::from_inclusive(min, max)?;
        let cells = rect.cell_count();
        if cells > self.config.max_cells as u64 {
            return Err(GridError::TooManyCells {
                cells,
                max: self.config.max_cells,
            }
            .into());
        }
        Ok(self.resize_to(rect))
    }

    /// Centre the grid bounds on the cell containing `point`, reaching
    /// `focus_range` cells out in every planar direction.
    pub fn focus(&mut self, point: Vec3) -> Result<ResizeStats, SpaceError> {
        let centre = self.home_cell(point);
        let r = self.config.focus_range;
        let min = CellCoord::new(centre.x.saturating_sub(r), centre.z.saturating_sub(r));
        let max = CellCoord::new(centre.x.saturating_add(r), centre.z.saturating_add(r));
        self.set_bounds(min, max)
    }

    fn resize_to(&mut self, rect: GridRect) -> ResizeStats {
        let old_rect = self.grid.rect();
        if rect == old_rect {
            return ResizeStats {
                kept: self.grid.len(),
                ..ResizeStats::default()
            };
        }
        let _span = tracing::info_span!("resize_grid", ?rect).entered();
        let old_len = self.grid.len();

        let evicted = self.grid.resize(rect);
        self.log_evicted(&evicted);

        // Cells that just came into bounds start empty; give back the
        // registrations of chunks whose windows reach them.
        let mut reopened = 0;
        for (chunk, window) in &self.registered {
            if !window.overlaps(&rect) {
                continue;
            }
            for coord in window.coords().filter(|c| !old_rect.contains(*c)) {
                if let Some(cell) = self.grid.cell_at_mut(coord) {
                    if cell.open_and_see(*chunk) {
                        self.changes.push(VisibilityChange::Entered {
                            chunk: *chunk,
                            cell: coord,
                        });
                        reopened += 1;
                    }
                }
            }
        }

        let kept = old_len - evicted.len();
        let stats = ResizeStats {
            kept,
            created: rect.area() - kept,
            evicted: evicted.len(),
            reopened,
        };
        tracing::debug!(
            kept = stats.kept,
            created = stats.created,
            evicted = stats.evicted,
            reopened = stats.reopened,
            "grid resized"
        );

        self.stats.last_resize = stats;
        self.refresh_totals();
        stats
    }

    /// Drop every cell and send every registered chunk back to the pending
    /// queue, so the next focus and drain rebuild visibility from scratch.
    pub fn blur(&mut self) {
        let origin = self.grid.rect().origin;
        let evicted = self.grid.resize(GridRect::new(origin, 0, 0));
        self.log_evicted(&evicted);

        let mut chunks: Vec<ChunkId> = self.registered.drain().map(|(id, _)| id).collect();
        chunks.sort();
        tracing::debug!(requeued = chunks.len(), "space blurred");
        self.pending.extend(chunks);
        self.refresh_totals();
    }

    /// Drop all cells, registrations and queued chunks.
    pub fn clear(&mut self) {
        let origin = self.grid.rect().origin;
        let evicted = self.grid.resize(GridRect::new(origin, 0, 0));
        self.log_evicted(&evicted);
        self.registered.clear();
        self.pending.clear();
        self.refresh_totals();
    }

    fn log_evicted(&mut self, evicted: &[Cell]) {
        for cell in evicted {
            for chunk in cell.seen_chunks() {
                self.changes.push(VisibilityChange::Left {
                    chunk,
                    cell: cell.coord(),
                });
            }
        }
    }

    fn refresh_totals(&mut self) {
        self.stats.registered_chunks = self.registered.len();
        self.stats.resident_cells = self.grid.len();
        self.stats.pending_chunks = self.pending.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::collections::HashSet;

    /// In-memory host: chunks are just centres, with scripted failures and
    /// moves applied during materialization.
    #[derive(Default)]
    struct TestHost {
        centres: HashMap<ChunkId, Vec3>,
        materialized: Vec<ChunkId>,
        failures: HashMap<ChunkId, u32>,
        moves: HashMap<ChunkId, Vec3>,
        vanish: HashSet<ChunkId>,
        /// Other chunks to queue the first time a chunk is materialized.
        pushes: HashMap<ChunkId, Vec<ChunkId>>,
    }

    impl TestHost {
        fn add(&mut self, x: f32, z: f32) -> ChunkId {
            let id = ChunkId::new();
            self.centres.insert(id, Vec3::new(x, 0.0, z));
            id
        }

        fn place(&mut self, id: ChunkId, x: f32, z: f32) {
            self.centres.insert(id, Vec3::new(x, 0.0, z));
        }

        fn passes(&self, id: ChunkId) -> usize {
            self.materialized.iter().filter(|c| **c == id).count()
        }
    }

    impl ChunkHost for TestHost {
        fn centre(&self, chunk: ChunkId) -> Option<Vec3> {
            self.centres.get(&chunk).copied()
        }

        fn materialize(&mut self, chunk: ChunkId, pending: &mut PendingQueue) {
            self.materialized.push(chunk);
            if let Some(pos) = self.moves.remove(&chunk) {
                self.centres.insert(chunk, pos);
            }
            if self.vanish.remove(&chunk) {
                self.centres.remove(&chunk);
            }
            for other in self.pushes.remove(&chunk).unwrap_or_default() {
                pending.push(other);
            }
            if let Some(left) = self.failures.get_mut(&chunk) {
                if *left > 0 {
                    *left -= 1;
                    pending.push(chunk);
                }
            }
        }
    }

    fn space_with_bounds(min: (i32, i32), max: (i32, i32)) -> Space {
        let mut space = Space::new(SpaceConfig::with_resolution(100.0)).unwrap();
        space
            .set_bounds(CellCoord::new(min.0, min.1), CellCoord::new(max.0, max.1))
            .unwrap();
        space
    }

    /// Every resident cell sees exactly the registered chunks whose windows
    /// cover it, and holds no shut leftovers.
    fn assert_registration_invariant(space: &Space) {
        for cell in space.grid().cells() {
            let seen: HashSet<ChunkId> = cell.seen_chunks().collect();
            assert_eq!(seen.len(), cell.len(), "shut entry left in {}", cell.coord());
            let expected: HashSet<ChunkId> = space
                .registered
                .iter()
                .filter(|(_, n)| n.contains(cell.coord()))
                .map(|(id, _)| *id)
                .collect();
            assert_eq!(seen, expected, "cell {}", cell.coord());
        }
    }

    fn cells_seeing(space: &Space, chunk: ChunkId) -> HashSet<CellCoord> {
        space
            .grid()
            .cells()
            .filter(|c| c.has_seen(chunk))
            .map(Cell::coord)
            .collect()
    }

    fn window(x0: i32, x1: i32, z0: i32, z1: i32) -> HashSet<CellCoord> {
        (x0..=x1)
            .flat_map(|x| (z0..=z1).map(move |z| CellCoord::new(x, z)))
            .collect()
    }

    #[test]
    fn new_rejects_invalid_config() {
        let err = Space::new(SpaceConfig::with_resolution(0.0)).err();
        assert!(matches!(err, Some(SpaceError::Config(_))));
    }

    #[test]
    fn home_cell_uses_floor() {
        let space = Space::new(SpaceConfig::with_resolution(100.0)).unwrap();
        assert_eq!(
            space.home_cell(Vec3::new(-50.0, 0.0, -50.0)),
            CellCoord::new(-1, -1)
        );
        assert_eq!(
            space.home_cell(Vec3::new(150.0, 0.0, 150.0)),
            CellCoord::new(1, 1)
        );
    }

    #[test]
    fn drain_registers_chunk_in_its_window() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);

        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.entered, 9);
        assert_eq!(stats.left, 0);
        assert_eq!(cells_seeing(&space, a), window(0, 2, 0, 2));
        assert_eq!(space.visible_from(CellCoord::new(1, 1)), vec![a]);
        assert!(space.pending().is_empty());
        assert_registration_invariant(&space);
    }

    #[test]
    fn window_clipped_to_grid_bounds() {
        let mut space = space_with_bounds((0, 0), (3, 3));
        let mut host = TestHost::default();
        let a = host.add(50.0, 50.0);

        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(stats.entered, 4);
        assert_eq!(cells_seeing(&space, a), window(0, 1, 0, 1));
        assert!(space.visible_from(CellCoord::new(-1, -1)).is_empty());
        assert_registration_invariant(&space);
    }

    #[test]
    fn redrain_without_movement_changes_nothing() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(-20.0, 30.0);

        space.enqueue(a);
        space.drain_pending(&mut host);
        space.drain_changes();

        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(stats.entered, 0);
        assert_eq!(stats.left, 0);
        assert!(space.changes().is_empty());
        assert_eq!(cells_seeing(&space, a), window(-2, 0, -1, 1));
        assert_registration_invariant(&space);
    }

    #[test]
    fn moved_chunk_leaves_old_window_once() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.enqueue(a);
        space.drain_pending(&mut host);
        space.drain_changes();

        // one cell to the right: 3 cells left, 3 entered, 6 untouched
        host.place(a, 250.0, 150.0);
        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(stats.entered, 3);
        assert_eq!(stats.left, 3);
        let changes = space.drain_changes();
        assert_eq!(changes.len(), 6);
        for z in 0..=2 {
            assert!(changes.contains(&VisibilityChange::Left {
                chunk: a,
                cell: CellCoord::new(0, z)
            }));
            assert!(changes.contains(&VisibilityChange::Entered {
                chunk: a,
                cell: CellCoord::new(3, z)
            }));
        }
        assert_eq!(cells_seeing(&space, a), window(1, 3, 0, 2));
        assert_registration_invariant(&space);
    }

    #[test]
    fn move_during_materialize_uses_new_centre() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.enqueue(a);
        space.drain_pending(&mut host);

        host.moves.insert(a, Vec3::new(-450.0, 0.0, -450.0));
        space.enqueue(a);
        space.drain_pending(&mut host);

        assert_eq!(cells_seeing(&space, a), window(-6, -4, -6, -4));
        assert_eq!(
            space.neighborhood_of(a).map(|n| n.home),
            Some(CellCoord::new(-5, -5))
        );
        assert_registration_invariant(&space);
    }

    #[test]
    fn requeued_chunk_is_retried_in_same_drain() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let b = host.add(500.0, 0.0);
        let c = host.add(0.0, 500.0);
        host.failures.insert(a, 2);

        space.enqueue(a);
        space.enqueue(b);
        space.enqueue(c);
        let stats = space.drain_pending(&mut host);

        assert_eq!(host.materialized, vec![a, b, c, a, a]);
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.deferred, 0);
        assert_eq!(host.passes(b), 1);
        assert_eq!(host.passes(c), 1);
        assert!(space.pending().is_empty());
        // retries do not double-register
        assert_eq!(cells_seeing(&space, a).len(), 9);
        assert_eq!(stats.entered, 27);
        assert_registration_invariant(&space);
    }

    #[test]
    fn pushing_a_queued_chunk_does_not_run_it_twice() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let b = host.add(500.0, 0.0);
        host.pushes.insert(a, vec![b]);

        space.enqueue(a);
        space.enqueue(b);
        let stats = space.drain_pending(&mut host);

        assert_eq!(host.materialized, vec![a, b]);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.retried, 0);
        assert!(space.pending().is_empty());
        assert_registration_invariant(&space);
    }

    #[test]
    fn pushing_a_processed_chunk_runs_it_again() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let c = host.add(0.0, 500.0);
        host.pushes.insert(a, vec![c]);

        space.enqueue(c);
        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(host.materialized, vec![c, a, c]);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.deferred, 0);
        assert!(space.pending().is_empty());
        // the second pass reopens the same window without new sightings
        assert_eq!(stats.entered, 18);
        assert_eq!(cells_seeing(&space, c), window(-1, 1, 4, 6));
        assert_registration_invariant(&space);
    }

    #[test]
    fn persistent_failure_is_deferred_not_blocking() {
        let config = SpaceConfig {
            retry_limit: 2,
            ..SpaceConfig::with_resolution(100.0)
        };
        let mut space = Space::new(config).unwrap();
        space
            .set_bounds(CellCoord::new(-5, -5), CellCoord::new(5, 5))
            .unwrap();
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let b = host.add(300.0, 300.0);
        host.failures.insert(a, u32::MAX);

        space.enqueue(a);
        space.enqueue(b);
        let stats = space.drain_pending(&mut host);

        assert_eq!(host.passes(a), 3);
        assert_eq!(host.passes(b), 1);
        assert_eq!(stats.deferred, 1);
        assert!(space.pending().contains(a));
        assert!(!space.pending().contains(b));

        // retried again on the next drain
        space.drain_pending(&mut host);
        assert_eq!(host.passes(a), 6);
        assert_eq!(host.passes(b), 1);
        assert_registration_invariant(&space);
    }

    #[test]
    fn vanished_chunk_is_unregistered() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        space.enqueue(a);
        space.drain_pending(&mut host);

        host.vanish.insert(a);
        space.enqueue(a);
        let stats = space.drain_pending(&mut host);

        assert_eq!(stats.left, 9);
        assert!(!space.is_registered(a));
        assert!(cells_seeing(&space, a).is_empty());
        assert!(space.grid().cells().all(Cell::is_empty));
    }

    #[test]
    fn notice_is_idempotent() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);

        assert_eq!(space.notice_chunk_near_focus(&host, a), 9);
        let lens: Vec<usize> = space.grid().cells().map(Cell::len).collect();

        assert_eq!(space.notice_chunk_near_focus(&host, a), 0);
        let again: Vec<usize> = space.grid().cells().map(Cell::len).collect();

        assert_eq!(lens, again);
        assert_eq!(space.changes().len(), 9);
        assert!(host.materialized.is_empty());
        assert_registration_invariant(&space);
    }

    #[test]
    fn notice_after_move_retires_old_window() {
        let mut space = space_with_bounds((-10, -10), (10, 10));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.notice_chunk_near_focus(&host, a);

        host.place(a, 350.0, 150.0);
        space.notice_chunk_near_focus(&host, a);

        assert_eq!(cells_seeing(&space, a), window(2, 4, 0, 2));
        assert_registration_invariant(&space);
    }

    #[test]
    fn notice_unknown_chunk_is_ignored() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let host = TestHost::default();
        assert_eq!(space.notice_chunk_near_focus(&host, ChunkId::new()), 0);
        assert_eq!(space.registered_count(), 0);
    }

    #[test]
    fn forget_removes_chunk_everywhere() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let b = host.add(100.0, 0.0);
        space.notice_chunk_near_focus(&host, a);
        space.notice_chunk_near_focus(&host, b);
        space.enqueue(a);

        assert!(space.forget_chunk(a));
        assert!(!space.is_registered(a));
        assert!(!space.pending().contains(a));
        assert!(cells_seeing(&space, a).is_empty());
        assert_eq!(cells_seeing(&space, b).len(), 9);
        assert_registration_invariant(&space);

        assert!(!space.forget_chunk(a));
    }

    #[test]
    fn forget_queued_but_unregistered_chunk() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let a = ChunkId::new();
        space.enqueue(a);
        assert!(space.forget_chunk(a));
        assert!(space.pending().is_empty());
    }

    #[test]
    fn shrinking_bounds_evicts_cells_but_keeps_others() {
        let mut space = space_with_bounds((0, 0), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.notice_chunk_near_focus(&host, a);
        let serial = space.cell_at(CellCoord::new(1, 1)).unwrap().serial();
        space.drain_changes();

        let stats = space
            .set_bounds(CellCoord::new(1, 1), CellCoord::new(5, 5))
            .unwrap();

        assert_eq!(stats.evicted, 11);
        assert_eq!(stats.kept, 25);
        assert_eq!(stats.created, 0);
        assert!(space.cell_at(CellCoord::new(0, 0)).is_none());
        let cell = space.cell_at(CellCoord::new(1, 1)).unwrap();
        assert_eq!(cell.serial(), serial);
        assert!(cell.has_seen(a));
        // (0,0), (0,1), (0,2), (1,0), (2,0) were dropped with a in them
        let left = space
            .changes()
            .iter()
            .filter(|c| matches!(c, VisibilityChange::Left { .. }))
            .count();
        assert_eq!(left, 5);
        assert_registration_invariant(&space);
    }

    #[test]
    fn growing_bounds_restores_registrations() {
        let mut space = space_with_bounds((1, 1), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.notice_chunk_near_focus(&host, a);
        assert_eq!(cells_seeing(&space, a).len(), 4);

        let stats = space
            .set_bounds(CellCoord::new(-3, -3), CellCoord::new(5, 5))
            .unwrap();

        assert_eq!(stats.reopened, 5);
        assert_eq!(cells_seeing(&space, a), window(0, 2, 0, 2));
        assert_registration_invariant(&space);
    }

    #[test]
    fn unchanged_bounds_skip_resize() {
        let mut space = space_with_bounds((0, 0), (3, 3));
        let serials: Vec<u64> = space.grid().cells().map(Cell::serial).collect();
        let stats = space
            .set_bounds(CellCoord::new(0, 0), CellCoord::new(3, 3))
            .unwrap();
        assert_eq!(stats.kept, 16);
        assert_eq!(stats.created, 0);
        let after: Vec<u64> = space.grid().cells().map(Cell::serial).collect();
        assert_eq!(serials, after);
    }

    #[test]
    fn degenerate_bounds_drop_every_cell() {
        let mut space = space_with_bounds((0, 0), (3, 3));
        let mut host = TestHost::default();
        let a = host.add(150.0, 150.0);
        space.notice_chunk_near_focus(&host, a);

        let stats = space
            .set_bounds(CellCoord::new(3, 3), CellCoord::new(2, 2))
            .unwrap();

        assert_eq!(stats.evicted, 16);
        assert!(space.grid().is_empty());
        assert!(space.is_registered(a));
        assert!(space.visible_from(CellCoord::new(1, 1)).is_empty());
    }

    #[test]
    fn oversized_bounds_are_rejected() {
        let mut space = space_with_bounds((0, 0), (3, 3));
        let err = space.set_bounds(CellCoord::new(i32::MIN, 0), CellCoord::new(i32::MAX, 0));
        assert!(matches!(err, Err(SpaceError::Grid(_))));
        assert_eq!(space.grid().len(), 16);
    }

    #[test]
    fn bounds_past_cell_cap_are_rejected() {
        let mut space = space_with_bounds((0, 0), (3, 3));
        // each side fits a u32, the area does not fit the cap
        let err = space.set_bounds(
            CellCoord::new(i32::MIN, i32::MIN),
            CellCoord::new(i32::MAX - 1, i32::MAX - 1),
        );
        assert!(matches!(
            err,
            Err(SpaceError::Grid(GridError::TooManyCells { .. }))
        ));
        assert_eq!(space.grid().len(), 16);

        let config = SpaceConfig {
            max_cells: 100,
            focus_range: 2,
            ..SpaceConfig::with_resolution(100.0)
        };
        let mut space = Space::new(config).unwrap();
        assert!(space.set_bounds(CellCoord::new(0, 0), CellCoord::new(9, 9)).is_ok());
        let err = space.set_bounds(CellCoord::new(0, 0), CellCoord::new(10, 9));
        assert_eq!(
            err,
            Err(SpaceError::Grid(GridError::TooManyCells {
                cells: 110,
                max: 100,
            }))
        );
        assert_eq!(space.grid().len(), 100);
    }

    #[test]
    fn focus_range_past_cell_cap_is_rejected_up_front() {
        let config = SpaceConfig {
            focus_range: i32::MAX,
            ..SpaceConfig::with_resolution(100.0)
        };
        let err = Space::new(config).err();
        assert!(matches!(
            err,
            Some(SpaceError::Config(ConfigError::WindowTooLarge { .. }))
        ));
    }

    #[test]
    fn focus_centres_bounds_on_point() {
        let config = SpaceConfig {
            focus_range: 2,
            ..SpaceConfig::with_resolution(100.0)
        };
        let mut space = Space::new(config).unwrap();
        space.focus(Vec3::new(-50.0, 10.0, 250.0)).unwrap();

        let rect = space.grid().rect();
        assert_eq!(rect.origin, CellCoord::new(-3, 0));
        assert_eq!((rect.width, rect.height), (5, 5));
    }

    #[test]
    fn blur_requeues_registered_chunks() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        let b = host.add(200.0, 0.0);
        space.notice_chunk_near_focus(&host, a);
        space.notice_chunk_near_focus(&host, b);

        space.blur();
        assert!(space.grid().is_empty());
        assert_eq!(space.registered_count(), 0);
        assert_eq!(space.pending().len(), 2);

        space
            .set_bounds(CellCoord::new(-5, -5), CellCoord::new(5, 5))
            .unwrap();
        space.drain_pending(&mut host);
        assert_eq!(cells_seeing(&space, a).len(), 9);
        assert_eq!(cells_seeing(&space, b).len(), 9);
        assert_registration_invariant(&space);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut space = space_with_bounds((-5, -5), (5, 5));
        let mut host = TestHost::default();
        let a = host.add(0.0, 0.0);
        space.notice_chunk_near_focus(&host, a);
        space.enqueue(host.add(100.0, 100.0));

        space.clear();
        assert!(space.grid().is_empty());
        assert_eq!(space.registered_count(), 0);
        assert!(space.pending().is_empty());
        assert_eq!(space.stats().resident_cells, 0);
    }

    #[test]
    fn invariant_holds_across_mixed_operations() {
        let mut space = space_with_bounds((-8, -8), (8, 8));
        let mut host = TestHost::default();
        let ids: Vec<ChunkId> = (0..12)
            .map(|i| host.add((i * 73 % 900) as f32 - 450.0, (i * 131 % 900) as f32 - 450.0))
            .collect();
        for id in &ids {
            space.enqueue(*id);
        }
        space.drain_pending(&mut host);
        assert_registration_invariant(&space);

        for step in 0..20i32 {
            let id = ids[(step as usize * 5) % ids.len()];
            let x = ((step * 97) % 1400 - 700) as f32;
            let z = ((step * 61) % 1400 - 700) as f32;
            host.place(id, x, z);
            match step % 4 {
                0 => {
                    space.enqueue(id);
                    space.drain_pending(&mut host);
                }
                1 => {
                    space.notice_chunk_near_focus(&host, id);
                }
                2 => {
                    space
                        .set_bounds(
                            CellCoord::new(-8 + step % 3, -8 - step % 2),
                            CellCoord::new(6 + step % 5, 7),
                        )
                        .unwrap();
                }
                _ => {
                    space.forget_chunk(id);
                    space.enqueue(id);
                    space.drain_pending(&mut host);
                }
            }
            assert_registration_invariant(&space);
        }
    }

    #[test]
    fn stats_track_totals() {
        let mut space = space_with_bounds((0, 0), (2, 2));
        let mut host = TestHost::default();
        let a = host.add(100.0, 100.0);
        space.enqueue(a);
        space.drain_pending(&mut host);

        let stats = space.stats();
        assert_eq!(stats.registered_chunks, 1);
        assert_eq!(stats.resident_cells, 9);
        assert_eq!(stats.pending_chunks, 0);
        assert_eq!(stats.last_drain.processed, 1);
        assert_eq!(stats.last_resize.created, 9);
    }

    #[test]
    fn stats_follow_enqueue_notice_and_forget() {
        let mut space = space_with_bounds((0, 0), (2, 2));
        let mut host = TestHost::default();
        let a = host.add(100.0, 100.0);
        let b = host.add(100.0, 100.0);

        space.enqueue(a);
        assert_eq!(space.stats().pending_chunks, 1);

        space.notice_chunk_near_focus(&host, b);
        assert_eq!(space.stats().registered_chunks, 1);

        space.forget_chunk(a);
        assert_eq!(space.stats().pending_chunks, 0);
        assert_eq!(space.stats().registered_chunks, 1);
    }
}
