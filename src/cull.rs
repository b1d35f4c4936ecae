// Culling predicates. Every function returns true when the triangle should be discarded,
// except the facing queries which just classify.

use crate::clipper::trivial_reject;
use crate::vertex::{ClipTriangle, Triangle};

// Below this clip space area a triangle is treated as colinear
pub const DEGENERATE_EPSILON: f32 = 1e-10;

pub const DEFAULT_GUARD_BAND: f32 = 2.0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

// Winding of front-facing triangles in NDC (y up)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Guard band extents as multiples of the viewport half-size.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuardBand {
    pub x: f32,
    pub y: f32,
}

impl Default for GuardBand {
    fn default() -> Self {
        Self {
            x: DEFAULT_GUARD_BAND,
            y: DEFAULT_GUARD_BAND,
        }
    }
}

// Conservative: may keep triangles that are outside along a diagonal
pub fn frustum_cull(triangle: &ClipTriangle) -> bool {
    trivial_reject(triangle)
}

pub fn small_triangle_cull(triangle: &Triangle, min_area: f32) -> bool {
    triangle.signed_area_x2().abs() < min_area
}

/// Rejects colinear triangles before the perspective divide. The area ignores
/// w, so it only approximates the NDC area.
pub fn degenerate_triangle_cull(triangle: &ClipTriangle) -> bool {
    let p0 = triangle.vertices[0].pos_clip;
    let p1 = triangle.vertices[1].pos_clip;
    let p2 = triangle.vertices[2].pos_clip;
    let area = (p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y);
    area.abs() < DEGENERATE_EPSILON
}

/// Exact test after the perspective divide, for triangles whose vertices all
/// have a positive w (anything that came out of near plane clipping).
pub fn degenerate_ndc_cull(triangle: &ClipTriangle) -> bool {
    ndc_signed_area(triangle).abs() < DEGENERATE_EPSILON
}

/// Twice the signed NDC area, positive for counter-clockwise. Zero if any
/// vertex has `w <= 0`.
pub fn ndc_signed_area(triangle: &ClipTriangle) -> f32 {
    let (Some(p0), Some(p1), Some(p2)) = (
        triangle.vertices[0].ndc(),
        triangle.vertices[1].ndc(),
        triangle.vertices[2].ndc(),
    ) else {
        return 0.0;
    };
    (p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y)
}

// Zero-area triangles are neither front nor back facing
pub fn is_back_facing(triangle: &ClipTriangle, front_face: FrontFace) -> bool {
    let area = ndc_signed_area(triangle);
    match front_face {
        FrontFace::CounterClockwise => area < 0.0,
        FrontFace::Clockwise => area > 0.0,
    }
}

pub fn is_front_facing(triangle: &ClipTriangle, front_face: FrontFace) -> bool {
    let area = ndc_signed_area(triangle);
    match front_face {
        FrontFace::CounterClockwise => area > 0.0,
        FrontFace::Clockwise => area < 0.0,
    }
}

pub fn facing_cull(triangle: &ClipTriangle, cull_mode: CullMode, front_face: FrontFace) -> bool {
    match cull_mode {
        CullMode::None => false,
        CullMode::Front => is_front_facing(triangle, front_face),
        CullMode::Back => is_back_facing(triangle, front_face),
    }
}

/// Rejects a triangle only when all three vertices are beyond the same side of
/// the enlarged viewport `|x| <= gb.x * w`, `|y| <= gb.y * w`.
pub fn guard_band_cull(triangle: &ClipTriangle, guard_band: GuardBand) -> bool {
    let mut outside_right = true;
    let mut outside_left = true;
    let mut outside_top = true;
    let mut outside_bottom = true;
    for v in &triangle.vertices {
        let p = v.pos_clip;
        outside_right &= p.x > guard_band.x * p.w;
        outside_left &= p.x < -guard_band.x * p.w;
        outside_top &= p.y > guard_band.y * p.w;
        outside_bottom &= p.y < -guard_band.y * p.w;
    }
    outside_right || outside_left || outside_top || outside_bottom
}
