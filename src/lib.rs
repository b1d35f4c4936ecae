//! CPU rasterization core: clip space clipping and culling, tile binning, a
//! bounded worker pool that runs one task per tile, and the per-pixel depth,
//! stencil and blend units those tasks call into.

pub mod blend;
pub mod clipper;
pub mod cull;
pub mod depth;
pub mod error;
pub mod fragment;
pub mod rasterizer;
pub mod stencil;
pub mod tile;
pub mod vertex;
pub mod worker;

pub use blend::{BlendFactor, BlendOperation, BlendState, blend};
pub use clipper::{ClipPlane, ClipPlaneSet, Outcode, clip_fast};
pub use cull::{CullMode, FrontFace, GuardBand};
pub use depth::{CompareFunc, DepthBuffer};
pub use error::{RasterError, Result};
pub use fragment::{Fragment, FragmentArena, ScratchPool, rasterize_triangle};
pub use rasterizer::{ParallelConfig, ParallelRasterizer, RasterState, RasterStats};
pub use stencil::{StencilBuffer, StencilOp, StencilState};
pub use tile::{TILE_SIZE, Tile, TileBins, TileGrid};
pub use vertex::{ClipSpaceVertex, ClipTriangle, ScreenVertex, Triangle};
pub use worker::WorkerPool;
