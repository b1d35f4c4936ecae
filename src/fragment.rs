use crate::tile::Tile;
use crate::vertex::Triangle;
use crossbeam::queue::SegQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

// A rasterized sample, transient within one tile task
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fragment {
    pub x: i32,
    pub y: i32,
    pub depth: f32,
    // Screen space weights for v0, v1, v2, summing to 1
    pub barycentric: [f32; 3],
    attribute_start: usize,
    attribute_count: usize,
}

// Fragments and their interpolated attributes, stored flat so the buffers can be reused
#[derive(Default)]
pub struct FragmentArena {
    fragments: Vec<Fragment>,
    attributes: Vec<f32>,
}

impl FragmentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn attributes(&self, fragment: &Fragment) -> &[f32] {
        &self.attributes
            [fragment.attribute_start..fragment.attribute_start + fragment.attribute_count]
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    // Drops the contents but keeps the allocations
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.attributes.clear();
    }

    pub fn capacity(&self) -> usize {
        self.fragments.capacity()
    }
}

/// Hands out [`FragmentArena`]s to tile tasks and takes them back when the
/// guard drops. Arenas are cleared on return, never deallocated, so steady
/// state rendering does not touch the allocator for fragment storage.
pub struct ScratchPool {
    freelist: SegQueue<FragmentArena>,
    allocated: AtomicUsize,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            freelist: SegQueue::new(),
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn acquire(&self) -> ScratchArena<'_> {
        let arena = self.freelist.pop().unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            FragmentArena::new()
        });
        ScratchArena {
            pool: self,
            arena: Some(arena),
        }
    }

    // Number of arenas ever created by this pool
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn release(&self, mut arena: FragmentArena) {
        arena.clear();
        self.freelist.push(arena);
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScratchArena<'a> {
    pool: &'a ScratchPool,
    arena: Option<FragmentArena>,
}

impl Deref for ScratchArena<'_> {
    type Target = FragmentArena;

    fn deref(&self) -> &FragmentArena {
        // Only taken in drop
        self.arena.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for ScratchArena<'_> {
    fn deref_mut(&mut self) -> &mut FragmentArena {
        self.arena.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for ScratchArena<'_> {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.release(arena);
        }
    }
}

/// Edge function coefficients for a screen space triangle.
///
/// `w0` is the edge v1->v2, `w1` is v2->v0 and `w2` is v0->v1. Coefficients
/// are sign-normalized so that the interior is positive regardless of winding.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TriangleEdges {
    a: [f32; 3],
    b: [f32; 3],
    c: [f32; 3],
    area: f32,
}

impl TriangleEdges {
    // None for zero-area or non-finite triangles
    pub(crate) fn new(triangle: &Triangle) -> Option<Self> {
        let p0 = triangle.vertices[0].xy();
        let p1 = triangle.vertices[1].xy();
        let p2 = triangle.vertices[2].xy();

        // Edge v1->v2: (y2-y1)x + (x1-x2)y + (x2*y1 - x1*y2) = 0
        let a12 = p2.y - p1.y;
        let b12 = p1.x - p2.x;
        let c12 = p2.x * p1.y - p1.x * p2.y;

        // Edge v2->v0: (y0-y2)x + (x2-x0)y + (x0*y2 - x2*y0) = 0
        let a20 = p0.y - p2.y;
        let b20 = p2.x - p0.x;
        let c20 = p0.x * p2.y - p2.x * p0.y;

        // Edge v0->v1: (y1-y0)x + (x0-x1)y + (x1*y0 - x0*y1) = 0
        let a01 = p1.y - p0.y;
        let b01 = p0.x - p1.x;
        let c01 = p1.x * p0.y - p0.x * p1.y;

        let area = a12 * p0.x + b12 * p0.y + c12;
        if area == 0.0 || !area.is_finite() {
            return None;
        }

        let sign = area.signum();
        Some(Self {
            a: [a12 * sign, a20 * sign, a01 * sign],
            b: [b12 * sign, b20 * sign, b01 * sign],
            c: [c12 * sign, c20 * sign, c01 * sign],
            area: area * sign,
        })
    }

    #[inline]
    pub(crate) fn evaluate(&self, x: f32, y: f32) -> [f32; 3] {
        [
            self.a[0] * x + self.b[0] * y + self.c[0],
            self.a[1] * x + self.b[1] * y + self.c[1],
            self.a[2] * x + self.b[2] * y + self.c[2],
        ]
    }

    // Top-left fill rule with y down: left edges have the interior to their
    // right (a > 0), top edges are horizontal with the interior below (b > 0).
    // Pixel centers exactly on any other edge belong to the neighbor.
    pub(crate) fn top_left(&self) -> [bool; 3] {
        let is_top_left = |i: usize| self.a[i] > 0.0 || (self.a[i] == 0.0 && self.b[i] > 0.0);
        [is_top_left(0), is_top_left(1), is_top_left(2)]
    }

    // True if the whole rectangle is strictly outside at least one edge
    pub(crate) fn rect_outside(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> bool {
        let corners = [
            self.evaluate(min_x, min_y),
            self.evaluate(max_x, min_y),
            self.evaluate(min_x, max_y),
            self.evaluate(max_x, max_y),
        ];
        (0..3).any(|edge| corners.iter().all(|corner| corner[edge] < 0.0))
    }
}

/// Scan converts `triangle` inside `tile`, appending one fragment per covered
/// pixel center to `arena`. Centers on an edge follow the top-left rule, so
/// triangles sharing an edge never both cover a pixel. Attributes are interpolated
/// perspective-correctly; depth is interpolated linearly in screen space.
/// Returns the number of fragments appended.
pub fn rasterize_triangle(tile: &Tile, triangle: &Triangle, arena: &mut FragmentArena) -> usize {
    let Some(edges) = TriangleEdges::new(triangle) else {
        return 0;
    };

    // Triangle bounds clipped to the tile, in pixels (exclusive max)
    let (min, max) = triangle.bounds();
    let x_start = (min.x.floor() as i32).max(tile.screen_min.x);
    let y_start = (min.y.floor() as i32).max(tile.screen_min.y);
    let x_end = (max.x.floor() as i32 + 1).min(tile.screen_max.x);
    let y_end = (max.y.floor() as i32 + 1).min(tile.screen_max.y);
    if x_start >= x_end || y_start >= y_end {
        return 0;
    }

    let [v0, v1, v2] = &triangle.vertices;
    let attribute_count = v0
        .attributes_over_w
        .len()
        .min(v1.attributes_over_w.len())
        .min(v2.attributes_over_w.len());
    let one_over_area = 1.0 / edges.area;
    let top_left = edges.top_left();
    let covers = |w: f32, edge: usize| w > 0.0 || (w == 0.0 && top_left[edge]);

    // Initial edge values at the first pixel center, then step per pixel
    let mut w_row = edges.evaluate(x_start as f32 + 0.5, y_start as f32 + 0.5);
    let before = arena.fragments.len();

    for y in y_start..y_end {
        let mut w = w_row;
        for x in x_start..x_end {
            if covers(w[0], 0) && covers(w[1], 1) && covers(w[2], 2) {
                let bary = [
                    w[0] * one_over_area,
                    w[1] * one_over_area,
                    w[2] * one_over_area,
                ];
                let depth = bary[0] * v0.pos_screen.z
                    + bary[1] * v1.pos_screen.z
                    + bary[2] * v2.pos_screen.z;
                let one_over_w =
                    bary[0] * v0.one_over_w + bary[1] * v1.one_over_w + bary[2] * v2.one_over_w;
                let w_interp = 1.0 / one_over_w;

                let attribute_start = arena.attributes.len();
                for i in 0..attribute_count {
                    let value = bary[0] * v0.attributes_over_w[i]
                        + bary[1] * v1.attributes_over_w[i]
                        + bary[2] * v2.attributes_over_w[i];
                    arena.attributes.push(value * w_interp);
                }

                arena.fragments.push(Fragment {
                    x,
                    y,
                    depth,
                    barycentric: bary,
                    attribute_start,
                    attribute_count,
                });
            }

            // Step in X
            w[0] += edges.a[0];
            w[1] += edges.a[1];
            w[2] += edges.a[2];
        }

        // Step in Y
        w_row[0] += edges.b[0];
        w_row[1] += edges.b[1];
        w_row[2] += edges.b[2];
    }

    arena.fragments.len() - before
}
