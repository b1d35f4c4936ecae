use crate::clipper::{ClipPlaneSet, clip_fast};
use crate::cull::{
    CullMode, FrontFace, GuardBand, degenerate_ndc_cull, degenerate_triangle_cull, facing_cull,
    frustum_cull, guard_band_cull, small_triangle_cull,
};
use crate::depth::DepthBuffer;
use crate::error::{RasterError, Result};
use crate::fragment::ScratchPool;
use crate::stencil::StencilBuffer;
use crate::tile::{TILE_SIZE, Tile, TileBins, TileGrid, bin_into};
use crate::vertex::{ClipTriangle, Triangle};
use crate::worker::{WorkerPool, panic_message};
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Below this many triangles, tiles are rasterized on the calling thread
pub const DEFAULT_MIN_TRIANGLES: usize = 10;

// Clip and cull in batches of this many triangles
const TRIANGLES_PER_BATCH: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParallelConfig {
    pub workers: usize,
    pub tile_size: usize,
    pub min_triangles: usize,
    pub queue_capacity: usize,
    // Use the edge-function tile test when binning
    pub precise_binning: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let workers = WorkerPool::default_worker_count();
        Self {
            workers,
            tile_size: TILE_SIZE,
            min_triangles: DEFAULT_MIN_TRIANGLES,
            queue_capacity: workers * 2,
            precise_binning: false,
        }
    }
}

impl ParallelConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.queue_capacity = workers * 2;
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_min_triangles(mut self, min_triangles: usize) -> Self {
        self.min_triangles = min_triangles;
        self
    }
}

/// Fixed-function state for the clip and cull stage.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RasterState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    // Twice the pixel area below which triangles are dropped
    pub min_area: f32,
    pub guard_band: Option<GuardBand>,
    pub clip_planes: ClipPlaneSet,
    // Also drop triangles that are colinear in clip space x/y before clipping.
    // Cheaper, but wrong for triangles whose vertices have different w.
    pub clip_space_degenerate_cull: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            min_area: 0.0,
            guard_band: None,
            clip_planes: ClipPlaneSet::Frustum,
            clip_space_degenerate_cull: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RasterStats {
    pub triangles: usize,
    // Triangle entries over all bins
    pub tile_references: usize,
    pub tiles_dispatched: usize,
    pub parallel: bool,
    pub bin_time: Duration,
    pub raster_time: Duration,
}

/// Bins screen space triangles into tiles and runs one callback per
/// non-empty tile on a worker pool.
///
/// Tiles partition the surface, each tile goes to exactly one task and a
/// callback must only write pixels inside its tile, so concurrent tasks never
/// write the same pixel. Within a tile, triangles arrive in submission order.
pub struct ParallelRasterizer {
    config: ParallelConfig,
    grid: TileGrid,
    pool: WorkerPool,
    bins: Arc<TileBins>,
    scratch: Arc<ScratchPool>,
}

impl ParallelRasterizer {
    pub fn new(width: usize, height: usize, config: ParallelConfig) -> Result<Self> {
        let grid = TileGrid::with_tile_size(width, height, config.tile_size)?;
        let pool = WorkerPool::with_queue_capacity(config.workers, config.queue_capacity)?;
        let bins = Arc::new(TileBins::new(grid.tile_count()));
        Ok(Self {
            config,
            grid,
            pool,
            bins,
            scratch: Arc::new(ScratchPool::new()),
        })
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }

    // Fragment arenas for tile callbacks to borrow from
    pub fn scratch_pool(&self) -> Arc<ScratchPool> {
        self.scratch.clone()
    }

    /// Rebuilds the tile grid. Depth and stencil buffers must be resized to
    /// match before the next draw, see [`Self::validate_targets`].
    pub fn resize(&mut self, width: usize, height: usize) -> Result<()> {
        self.grid.resize(width, height)?;
        self.bins = Arc::new(TileBins::new(self.grid.tile_count()));
        Ok(())
    }

    pub fn validate_targets(&self, depth: &DepthBuffer, stencil: &StencilBuffer) -> Result<()> {
        let expected = (self.grid.width(), self.grid.height());
        for actual in [depth.dimensions(), stencil.dimensions()] {
            if actual != expected {
                return Err(RasterError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }

    /// Clips, culls and projects clip space triangles to pixel space. Output
    /// keeps input order.
    pub fn prepare(&self, triangles: &[ClipTriangle], state: &RasterState) -> Vec<Triangle> {
        let width = self.grid.width() as f32;
        let height = self.grid.height() as f32;
        triangles
            .par_iter()
            .with_min_len(TRIANGLES_PER_BATCH)
            .flat_map_iter(|triangle| prepare_triangle(triangle, state, width, height))
            .collect()
    }

    /// Bins `triangles` and invokes `callback(tile, triangles_in_tile)` once
    /// for every tile with at least one triangle. Returns after every callback
    /// has finished. A panicking callback does not stop the other tiles and
    /// is reported as [`RasterError::TaskPanicked`] on either path.
    pub fn rasterize_parallel<F>(
        &mut self,
        triangles: &[Triangle],
        callback: F,
    ) -> Result<RasterStats>
    where
        F: Fn(&Tile, &[Triangle]) + Send + Sync + 'static,
    {
        let bin_start = Instant::now();
        let bins = exclusive_bins(&mut self.bins, self.grid.tile_count());
        bin_into(bins, triangles, &self.grid, self.config.precise_binning);
        let bin_time = bin_start.elapsed();

        let mut stats = RasterStats {
            triangles: triangles.len(),
            tile_references: self.bins.total_references(),
            bin_time,
            ..RasterStats::default()
        };

        let raster_start = Instant::now();
        if triangles.len() < self.config.min_triangles {
            // Not worth the dispatch overhead
            let mut first_panic = None;
            for (index, tile_triangles) in self.bins.non_empty() {
                let tile = &self.grid.tiles()[index];
                let result = catch_unwind(AssertUnwindSafe(|| callback(tile, tile_triangles)));
                if let Err(payload) = result {
                    let message = panic_message(payload);
                    log::warn!("tile task panicked: {}", message);
                    first_panic.get_or_insert(message);
                }
                stats.tiles_dispatched += 1;
            }
            if let Some(message) = first_panic {
                return Err(RasterError::TaskPanicked(message));
            }
        } else {
            stats.parallel = true;
            let callback = Arc::new(callback);
            let indices: Vec<usize> = self.bins.non_empty().map(|(index, _)| index).collect();
            for index in indices {
                let tile = self.grid.tiles()[index];
                let bins = self.bins.clone();
                let callback = callback.clone();
                self.pool.submit(move || (*callback)(&tile, bins.get(index)))?;
                stats.tiles_dispatched += 1;
            }
            log::trace!("dispatched {} tiles", stats.tiles_dispatched);
            self.pool.wait()?;
        }
        stats.raster_time = raster_start.elapsed();

        log::debug!(
            "rasterized {} triangles: {} tile refs over {} tiles, bin {:.2} ms, raster {:.2} ms",
            stats.triangles,
            stats.tile_references,
            stats.tiles_dispatched,
            stats.bin_time.as_secs_f64() * 1000.0,
            stats.raster_time.as_secs_f64() * 1000.0
        );
        Ok(stats)
    }

    /// [`Self::prepare`] followed by [`Self::rasterize_parallel`].
    pub fn draw<F>(
        &mut self,
        triangles: &[ClipTriangle],
        state: &RasterState,
        callback: F,
    ) -> Result<RasterStats>
    where
        F: Fn(&Tile, &[Triangle]) + Send + Sync + 'static,
    {
        let screen_triangles = self.prepare(triangles, state);
        self.rasterize_parallel(&screen_triangles, callback)
    }

    /// Stops the worker threads. Later parallel draws fail with
    /// [`RasterError::PoolClosed`].
    pub fn close(&mut self) {
        self.pool.close();
    }
}

// Tasks from the previous call have all finished and released their handles
// by now, so the bins are normally unshared
fn exclusive_bins(bins: &mut Arc<TileBins>, tile_count: usize) -> &mut TileBins {
    if Arc::get_mut(bins).is_none() {
        *bins = Arc::new(TileBins::new(tile_count));
    }
    Arc::make_mut(bins)
}

fn prepare_triangle(
    triangle: &ClipTriangle,
    state: &RasterState,
    width: f32,
    height: f32,
) -> Vec<Triangle> {
    if frustum_cull(triangle)
        || (state.clip_space_degenerate_cull && degenerate_triangle_cull(triangle))
    {
        return Vec::new();
    }
    if let Some(guard_band) = state.guard_band {
        if guard_band_cull(triangle, guard_band) {
            return Vec::new();
        }
    }

    // Area and facing are tested after clipping, once every vertex has a positive w
    clip_fast(triangle, state.clip_planes.planes())
        .into_iter()
        .filter(|clipped| !degenerate_ndc_cull(clipped))
        .filter(|clipped| !facing_cull(clipped, state.cull_mode, state.front_face))
        .map(|clipped| clipped.to_screen(width, height))
        .filter(|screen| !small_triangle_cull(screen, state.min_area))
        .collect()
}
