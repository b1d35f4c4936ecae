// Screen partitioning and triangle binning. Tiles never overlap, so tile
// tasks write pixels without synchronization.

use crate::error::{RasterError, Result};
use crate::fragment::TriangleEdges;
use crate::vertex::Triangle;
use glam::IVec2;

// Size (width and height) of raster tiles in pixels
pub const TILE_SIZE: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub index: usize,
    // Inclusive min, exclusive max, in pixels
    pub screen_min: IVec2,
    pub screen_max: IVec2,
}

impl Tile {
    pub fn width(&self) -> i32 {
        self.screen_max.x - self.screen_min.x
    }

    pub fn height(&self) -> i32 {
        self.screen_max.y - self.screen_min.y
    }

    pub fn area(&self) -> usize {
        (self.width() * self.height()) as usize
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.screen_min.x
            && x < self.screen_max.x
            && y >= self.screen_min.y
            && y < self.screen_max.y
    }
}

pub struct TileGrid {
    width: usize,
    height: usize,
    tile_size: usize,
    tiles_x: usize,
    tiles_y: usize,
    tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        Self::build(width, height, TILE_SIZE)
    }

    pub fn with_tile_size(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(RasterError::InvalidTileSize);
        }
        Self::build(width, height, tile_size)
    }

    fn build(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        let tiles_x = width.div_ceil(tile_size);
        let tiles_y = height.div_ceil(tile_size);

        let mut tiles = Vec::with_capacity(tiles_x * tiles_y);
        for y in 0..tiles_y {
            for x in 0..tiles_x {
                // Edge tiles are cut to the surface
                let screen_min = IVec2::new((x * tile_size) as i32, (y * tile_size) as i32);
                let screen_max = IVec2::new(
                    ((x + 1) * tile_size).min(width) as i32,
                    ((y + 1) * tile_size).min(height) as i32,
                );
                tiles.push(Tile {
                    index: tiles.len(),
                    screen_min,
                    screen_max,
                });
            }
        }

        let grid = Self {
            width,
            height,
            tile_size,
            tiles_x,
            tiles_y,
            tiles,
        };
        if !grid.is_exact_partition() {
            log::error!(
                "tile grid {}x{} / {} does not partition the surface",
                width,
                height,
                tile_size
            );
            return Err(RasterError::InvalidTileGrid {
                width,
                height,
                tile_size,
            });
        }
        log::debug!(
            "tile grid {}x{}: {}x{} tiles of {}px",
            width,
            height,
            tiles_x,
            tiles_y,
            tile_size
        );
        Ok(grid)
    }

    /// Rebuilds the grid for a new surface size. On error the grid is left
    /// unchanged.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<()> {
        *self = Self::build(width, height, self.tile_size)?;
        Ok(())
    }

    /// Checks that the tiles form a gap-free, non-overlapping grid over the
    /// surface: every row shares one y range, every column one x range, each
    /// tile starts where its left and upper neighbors end, and the last row
    /// and column end at the surface edges.
    pub fn is_exact_partition(&self) -> bool {
        if self.tiles.len() != self.tiles_x * self.tiles_y {
            return false;
        }
        if self.tiles.is_empty() {
            return self.width == 0 || self.height == 0;
        }

        let width = self.width as i64;
        let height = self.height as i64;
        for (index, tile) in self.tiles.iter().enumerate() {
            let tx = index % self.tiles_x;
            let ty = index / self.tiles_x;
            let row_start = &self.tiles[ty * self.tiles_x];
            let column_top = &self.tiles[tx];

            let expected_min_x = if tx == 0 { 0 } else { self.tiles[index - 1].screen_max.x };
            let expected_min_y = if ty == 0 { 0 } else { self.tiles[index - self.tiles_x].screen_max.y };
            if tile.index != index
                || tile.width() <= 0
                || tile.height() <= 0
                || tile.screen_min.x != expected_min_x
                || tile.screen_min.y != expected_min_y
                || tile.screen_min.y != row_start.screen_min.y
                || tile.screen_max.y != row_start.screen_max.y
                || tile.screen_min.x != column_top.screen_min.x
                || tile.screen_max.x != column_top.screen_max.x
            {
                return false;
            }
            if tx == self.tiles_x - 1 && tile.screen_max.x as i64 != width {
                return false;
            }
            if ty == self.tiles_y - 1 && tile.screen_max.y as i64 != height {
                return false;
            }
        }
        true
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    // Dense row-major index for tile grid coordinates
    #[inline]
    pub fn tile_index(&self, tile_x: usize, tile_y: usize) -> usize {
        tile_y * self.tiles_x + tile_x
    }

    pub fn tile_at_pixel(&self, x: i32, y: i32) -> Option<&Tile> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let index = self.tile_index(x as usize / self.tile_size, y as usize / self.tile_size);
        self.tiles.get(index)
    }

    /// Inclusive range of tile coordinates covered by the triangle's pixel
    /// bounding box, or None if the box misses the surface.
    pub fn tile_range(&self, triangle: &Triangle) -> Option<(IVec2, IVec2)> {
        if self.tiles.is_empty() {
            return None;
        }
        let (min, max) = triangle.bounds();
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        if max.x < 0.0 || max.y < 0.0 || min.x >= self.width as f32 || min.y >= self.height as f32 {
            return None;
        }

        // Pixel bounds, inclusive
        let min_px = min.floor().as_ivec2().max(IVec2::ZERO);
        let max_px = max
            .floor()
            .as_ivec2()
            .min(IVec2::new(self.width as i32 - 1, self.height as i32 - 1));

        let tile_size = self.tile_size as i32;
        Some((min_px / tile_size, max_px / tile_size))
    }
}

// Per-tile triangle lists, indexed by tile index
#[derive(Clone, Default)]
pub struct TileBins {
    bins: Vec<Vec<Triangle>>,
}

impl TileBins {
    pub fn new(tile_count: usize) -> Self {
        Self {
            bins: (0..tile_count).map(|_| Vec::new()).collect(),
        }
    }

    // Empties every bin and resizes to `tile_count`, keeping allocations
    pub fn reset(&mut self, tile_count: usize) {
        self.bins.resize_with(tile_count, Vec::new);
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn get(&self, tile_index: usize) -> &[Triangle] {
        self.bins.get(tile_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, tile_index: usize, triangle: Triangle) {
        self.bins[tile_index].push(triangle);
    }

    // Moves a bin's triangles out, leaving it empty
    pub fn take(&mut self, tile_index: usize) -> Vec<Triangle> {
        std::mem::take(&mut self.bins[tile_index])
    }

    // Non-empty bins in row-major order
    pub fn non_empty(&self) -> impl Iterator<Item = (usize, &[Triangle])> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, bin)| !bin.is_empty())
            .map(|(index, bin)| (index, bin.as_slice()))
    }

    pub fn non_empty_count(&self) -> usize {
        self.bins.iter().filter(|bin| !bin.is_empty()).count()
    }

    // Total number of triangle entries over all bins
    pub fn total_references(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }
}

/// True unless the tile's pixel centers are all strictly outside one of the
/// triangle's edges. Zero-area triangles are kept.
pub fn tile_overlaps_triangle(tile: &Tile, triangle: &Triangle) -> bool {
    let Some(edges) = TriangleEdges::new(triangle) else {
        return true;
    };
    !edges.rect_outside(
        tile.screen_min.x as f32 + 0.5,
        tile.screen_min.y as f32 + 0.5,
        tile.screen_max.x as f32 - 0.5,
        tile.screen_max.y as f32 - 0.5,
    )
}

/// Appends each triangle to the bin of every tile its bounding box touches.
/// Bins keep submission order.
pub fn bin_triangles_to_tiles(triangles: &[Triangle], grid: &TileGrid) -> TileBins {
    let mut bins = TileBins::new(grid.tile_count());
    bin_into(&mut bins, triangles, grid, false);
    bins
}

/// Like [`bin_triangles_to_tiles`] but drops tiles whose area the triangle's
/// edges exclude, trading per-tile edge evaluation for fewer empty tile visits.
pub fn bin_triangles_to_tiles_with_test(triangles: &[Triangle], grid: &TileGrid) -> TileBins {
    let mut bins = TileBins::new(grid.tile_count());
    bin_into(&mut bins, triangles, grid, true);
    bins
}

pub(crate) fn bin_into(
    bins: &mut TileBins,
    triangles: &[Triangle],
    grid: &TileGrid,
    edge_test: bool,
) {
    bins.reset(grid.tile_count());
    for triangle in triangles {
        let Some((min_tile, max_tile)) = grid.tile_range(triangle) else {
            continue;
        };
        for y in min_tile.y..=max_tile.y {
            for x in min_tile.x..=max_tile.x {
                let index = grid.tile_index(x as usize, y as usize);
                if edge_test && !tile_overlaps_triangle(&grid.tiles[index], triangle) {
                    continue;
                }
                bins.push(index, triangle.clone());
            }
        }
    }
}
