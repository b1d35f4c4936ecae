use glam::{IVec2, Vec4};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tilerast::blend::{BlendState, blend_rgba8, pack_rgba8};
use tilerast::depth::{CompareFunc, DepthBuffer};
use tilerast::fragment::{FragmentArena, ScratchPool, rasterize_triangle};
use tilerast::stencil::{StencilBuffer, StencilOp, StencilState};
use tilerast::tile::{Tile, TileGrid};
use tilerast::vertex::{ClipSpaceVertex, ClipTriangle, ScreenVertex, Triangle};
use tilerast::{ParallelConfig, ParallelRasterizer, RasterState};

struct Rng(u64);

impl Rng {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }
}

fn random_triangles(count: usize, size: f32, extent: f32, seed: u64) -> Vec<Triangle> {
    let mut rng = Rng(seed);
    (0..count)
        .map(|id| {
            let x = rng.range(0.0, extent);
            let y = rng.range(0.0, extent);
            // Integer corners keep edge evaluation exact
            let vertex = |rng: &mut Rng| {
                let vx = (x + rng.range(-size, size)).round();
                let vy = (y + rng.range(-size, size)).round();
                ScreenVertex::new(vx, vy, 0.5).with_attributes(vec![id as f32])
            };
            let v0 = vertex(&mut rng);
            let v1 = vertex(&mut rng);
            let v2 = vertex(&mut rng);
            Triangle::new(v0, v1, v2)
        })
        .collect()
}

// Tiles touched by the triangle's pixel bounding box
fn bbox_tiles(triangle: &Triangle, grid: &TileGrid) -> BTreeSet<usize> {
    let (min, max) = triangle.bounds();
    let last = IVec2::new(grid.width() as i32 - 1, grid.height() as i32 - 1);
    let min = min.floor().as_ivec2().clamp(IVec2::ZERO, last);
    let max = max.floor().as_ivec2().clamp(IVec2::ZERO, last);
    let tile_size = grid.tile_size() as i32;

    let mut tiles = BTreeSet::new();
    for ty in min.y / tile_size..=max.y / tile_size {
        for tx in min.x / tile_size..=max.x / tile_size {
            tiles.insert(grid.tile_index(tx as usize, ty as usize));
        }
    }
    tiles
}

fn triangle_id(triangle: &Triangle) -> usize {
    triangle.vertices[0].attributes_over_w[0] as usize
}

type Collected = Arc<Mutex<Vec<(usize, Vec<usize>)>>>;

fn collect_bins(
    rasterizer: &mut ParallelRasterizer,
    triangles: &[Triangle],
) -> Vec<(usize, Vec<usize>)> {
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    rasterizer
        .rasterize_parallel(triangles, move |tile, tris| {
            let ids = tris.iter().map(triangle_id).collect();
            sink.lock().push((tile.index, ids));
        })
        .unwrap();
    let mut collected = collected.lock().clone();
    collected.sort();
    collected
}

#[test]
fn test_parallel_bins_match_bounding_boxes() {
    let config = ParallelConfig::default().with_workers(4).with_tile_size(64);
    let mut rasterizer = ParallelRasterizer::new(512, 512, config).unwrap();
    let triangles = random_triangles(1000, 24.0, 512.0, 0x9e37_79b9_7f4a_7c15);

    let collected = collect_bins(&mut rasterizer, &triangles);

    let grid = rasterizer.grid();
    let mut expected: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (id, triangle) in triangles.iter().enumerate() {
        for tile in bbox_tiles(triangle, grid) {
            expected.entry(tile).or_default().push(id);
        }
    }

    // One callback per non-empty tile
    assert!(collected.len() <= 64);
    assert_eq!(collected.len(), expected.len());
    let tile_indices: BTreeSet<usize> = collected.iter().map(|(index, _)| *index).collect();
    assert_eq!(tile_indices.len(), collected.len());

    // Each tile saw exactly its overlapping triangles, in submission order
    for (index, ids) in &collected {
        assert_eq!(Some(ids), expected.get(index), "tile {}", index);
    }
}

#[test]
fn test_precise_binning_keeps_every_covering_tile() {
    let mut config = ParallelConfig::default().with_workers(4).with_tile_size(32);
    config.precise_binning = true;
    let mut rasterizer = ParallelRasterizer::new(256, 256, config).unwrap();
    let triangles = random_triangles(300, 40.0, 256.0, 42);

    let collected = collect_bins(&mut rasterizer, &triangles);
    let grid = rasterizer.grid();

    let mut binned: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for (index, ids) in &collected {
        for id in ids {
            binned.entry(*id).or_default().insert(*index);
        }
    }

    let mut arena = FragmentArena::new();
    for (id, triangle) in triangles.iter().enumerate() {
        let tiles = binned.remove(&id).unwrap_or_default();
        let candidates = bbox_tiles(triangle, grid);
        assert!(tiles.is_subset(&candidates));

        // Any tile that produces fragments must have been binned
        for index in candidates {
            let tile: &Tile = &grid.tiles()[index];
            if rasterize_triangle(tile, triangle, &mut arena) > 0 {
                assert!(tiles.contains(&index), "triangle {} missing tile {}", id, index);
            }
            arena.clear();
        }
    }
}

const WIDTH: usize = 64;
const HEIGHT: usize = 64;

#[derive(Clone)]
struct Frame {
    depth: Arc<DepthBuffer>,
    stencil: Arc<StencilBuffer>,
    color: Arc<Mutex<Vec<[u8; 4]>>>,
    scratch: Arc<ScratchPool>,
}

#[derive(Copy, Clone)]
struct Pass {
    depth_func: CompareFunc,
    stencil: StencilState,
    blend: BlendState,
    color_write: bool,
}

impl Default for Pass {
    fn default() -> Self {
        Self {
            depth_func: CompareFunc::Less,
            stencil: StencilState::default(),
            blend: BlendState::DISABLED,
            color_write: true,
        }
    }
}

impl Frame {
    fn new(scratch: Arc<ScratchPool>) -> Self {
        Self {
            depth: Arc::new(DepthBuffer::new(WIDTH, HEIGHT)),
            stencil: Arc::new(StencilBuffer::new(WIDTH, HEIGHT)),
            color: Arc::new(Mutex::new(vec![[0, 0, 0, 255]; WIDTH * HEIGHT])),
            scratch,
        }
    }

    fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        self.color.lock()[y * WIDTH + x]
    }

    // Per-tile fragment stage: depth, stencil, then blend
    fn shader(&self, pass: Pass) -> impl Fn(&Tile, &[Triangle]) + Send + Sync + 'static {
        let frame = self.clone();
        move |tile: &Tile, triangles: &[Triangle]| {
            let mut arena = frame.scratch.acquire();
            for triangle in triangles {
                arena.clear();
                rasterize_triangle(tile, triangle, &mut arena);
                for fragment in arena.fragments() {
                    assert!(tile.contains(fragment.x, fragment.y));
                    let (x, y) = (fragment.x, fragment.y);
                    let depth_passed = frame.depth.test(x, y, fragment.depth, pass.depth_func);
                    let stencil_passed =
                        frame.stencil.test_and_apply(x, y, depth_passed, &pass.stencil);
                    if !depth_passed || !stencil_passed {
                        continue;
                    }
                    frame.depth.set(x, y, fragment.depth);
                    if pass.color_write {
                        let a = arena.attributes(fragment);
                        let src = pack_rgba8(Vec4::new(a[0], a[1], a[2], a[3]));
                        let index = y as usize * WIDTH + x as usize;
                        let mut color = frame.color.lock();
                        color[index] = blend_rgba8(src, color[index], &pass.blend);
                    }
                }
            }
        }
    }
}

fn quad(min: (f32, f32), max: (f32, f32), z: f32, color: [f32; 4]) -> Vec<ClipTriangle> {
    let v = |x: f32, y: f32| ClipSpaceVertex::new(Vec4::new(x, y, z, 1.0), color.to_vec());
    vec![
        ClipTriangle::new(v(min.0, min.1), v(max.0, min.1), v(max.0, max.1)),
        ClipTriangle::new(v(min.0, min.1), v(max.0, max.1), v(min.0, max.1)),
    ]
}

fn fullscreen(z: f32, color: [f32; 4]) -> Vec<ClipTriangle> {
    quad((-1.0, -1.0), (1.0, 1.0), z, color)
}

fn near(a: u8, b: u8) -> bool {
    a.abs_diff(b) <= 1
}

fn rasterizer() -> ParallelRasterizer {
    let config = ParallelConfig::default()
        .with_workers(2)
        .with_tile_size(32)
        .with_min_triangles(1);
    ParallelRasterizer::new(WIDTH, HEIGHT, config).unwrap()
}

#[test]
fn test_depth_test_and_blending() {
    let mut rasterizer = rasterizer();
    let frame = Frame::new(rasterizer.scratch_pool());
    rasterizer
        .validate_targets(&frame.depth, &frame.stencil)
        .unwrap();
    let state = RasterState::default();

    let stats = rasterizer
        .draw(&fullscreen(0.5, [1.0, 0.0, 0.0, 1.0]), &state, frame.shader(Pass::default()))
        .unwrap();
    assert!(stats.parallel);
    assert_eq!(stats.tiles_dispatched, 4);
    for (x, y) in [(0, 0), (63, 0), (31, 32), (63, 63)] {
        let pixel = frame.pixel(x, y);
        assert!(pixel[0] >= 254 && pixel[1] == 0 && pixel[2] == 0, "{:?}", pixel);
        assert!((frame.depth.get(x as i32, y as i32) - 0.5).abs() < 1e-5);
    }

    // Behind the red quad, rejected everywhere
    rasterizer
        .draw(&fullscreen(0.8, [0.0, 1.0, 0.0, 1.0]), &state, frame.shader(Pass::default()))
        .unwrap();
    assert!(frame.color.lock().iter().all(|pixel| pixel[1] == 0));

    // In front and half transparent
    let over = Pass {
        blend: BlendState::SOURCE_OVER,
        ..Pass::default()
    };
    rasterizer
        .draw(&fullscreen(0.2, [0.0, 0.0, 1.0, 0.5]), &state, frame.shader(over))
        .unwrap();
    let pixel = frame.pixel(20, 40);
    assert!(near(pixel[0], 127) || near(pixel[0], 128), "{:?}", pixel);
    assert!(near(pixel[2], 127) || near(pixel[2], 128), "{:?}", pixel);
    assert!((frame.depth.get(20, 40) - 0.2).abs() < 1e-5);

    // Every tile task borrowed from the shared pool instead of allocating
    let allocated = rasterizer.scratch_pool().allocated();
    assert!((1..=2).contains(&allocated), "{}", allocated);
}

#[test]
fn test_stencil_masks_later_pass() {
    let mut rasterizer = rasterizer();
    let frame = Frame::new(rasterizer.scratch_pool());
    let state = RasterState::default();

    // Mark the left half without writing color
    let mark = Pass {
        depth_func: CompareFunc::Always,
        stencil: StencilState {
            enabled: true,
            pass_op: StencilOp::Replace,
            reference: 1,
            ..StencilState::default()
        },
        color_write: false,
        ..Pass::default()
    };
    rasterizer
        .draw(&quad((-1.0, -1.0), (0.0, 1.0), 0.9, [0.0; 4]), &state, frame.shader(mark))
        .unwrap();
    assert_eq!(frame.stencil.get(10, 10), 1);
    assert_eq!(frame.stencil.get(50, 10), 0);

    let masked = Pass {
        stencil: StencilState {
            enabled: true,
            compare: CompareFunc::Equal,
            reference: 1,
            ..StencilState::default()
        },
        ..Pass::default()
    };
    rasterizer
        .draw(&fullscreen(0.5, [0.0, 1.0, 0.0, 1.0]), &state, frame.shader(masked))
        .unwrap();

    for y in [0, 17, 63] {
        assert!(frame.pixel(10, y)[1] >= 254);
        assert_eq!(frame.pixel(50, y)[1], 0);
    }
    // Masked pixels kept the cleared depth
    assert_eq!(frame.depth.get(50, 17), 1.0);
}

#[test]
fn test_back_faces_never_reach_tiles() {
    let mut rasterizer = rasterizer();
    let frame = Frame::new(rasterizer.scratch_pool());
    let state = RasterState {
        cull_mode: tilerast::CullMode::Back,
        ..RasterState::default()
    };

    let reversed: Vec<ClipTriangle> = fullscreen(0.5, [1.0; 4])
        .into_iter()
        .map(|t| {
            let [a, b, c] = t.vertices;
            ClipTriangle::new(a, c, b)
        })
        .collect();
    let stats = rasterizer
        .draw(&reversed, &state, frame.shader(Pass::default()))
        .unwrap();
    assert_eq!(stats.triangles, 0);
    assert_eq!(stats.tiles_dispatched, 0);
    assert!(frame.depth.get_data().iter().all(|&d| d == 1.0));
}

#[test]
fn test_resize_then_draw() {
    let mut rasterizer = rasterizer();
    rasterizer.resize(100, 40).unwrap();
    let depth = DepthBuffer::new(100, 40);
    let stencil = StencilBuffer::new(100, 40);
    rasterizer.validate_targets(&depth, &stencil).unwrap();

    let grid = rasterizer.grid();
    assert_eq!((grid.tiles_x(), grid.tiles_y()), (4, 2));
    assert!(grid.is_exact_partition());

    let depth = Arc::new(depth);
    let d = depth.clone();
    rasterizer
        .draw(&fullscreen(0.25, [0.0; 4]), &RasterState::default(), move |tile, tris| {
            let mut arena = FragmentArena::new();
            for triangle in tris {
                rasterize_triangle(tile, triangle, &mut arena);
            }
            for fragment in arena.fragments() {
                d.test_and_set(fragment.x, fragment.y, fragment.depth, CompareFunc::Less, true);
            }
        })
        .unwrap();
    assert!(depth.get_data().iter().all(|&v| (v - 0.25).abs() < 1e-5));
}
