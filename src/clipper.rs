// Homogeneous clip space clipping against -w <= x, y <= w and 0 <= z <= w

use crate::vertex::{ClipSpaceVertex, ClipTriangle};
use bitflags::bitflags;
use glam::Vec4;

/// A clip space half-space `A*x + B*y + C*z + D*w >= 0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClipPlane {
    pub coefficients: Vec4,
}

impl ClipPlane {
    pub const NEAR: Self = Self::new(0.0, 0.0, 1.0, 0.0); // z >= 0
    pub const FAR: Self = Self::new(0.0, 0.0, -1.0, 1.0); // w - z >= 0
    pub const LEFT: Self = Self::new(1.0, 0.0, 0.0, 1.0); // x + w >= 0
    pub const RIGHT: Self = Self::new(-1.0, 0.0, 0.0, 1.0); // w - x >= 0
    pub const BOTTOM: Self = Self::new(0.0, 1.0, 0.0, 1.0); // y + w >= 0
    pub const TOP: Self = Self::new(0.0, -1.0, 0.0, 1.0); // w - y >= 0

    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            coefficients: Vec4::new(a, b, c, d),
        }
    }

    #[inline]
    pub fn distance(&self, vertex: &ClipSpaceVertex) -> f32 {
        self.coefficients.dot(vertex.pos_clip)
    }

    #[inline]
    pub fn is_inside(&self, vertex: &ClipSpaceVertex) -> bool {
        self.distance(vertex) >= 0.0
    }
}

pub const FRUSTUM_PLANES: [ClipPlane; 6] = [
    ClipPlane::NEAR,
    ClipPlane::FAR,
    ClipPlane::LEFT,
    ClipPlane::RIGHT,
    ClipPlane::BOTTOM,
    ClipPlane::TOP,
];

// Reduced set for use behind a guard band
pub const NEAR_FAR_PLANES: [ClipPlane; 2] = [ClipPlane::NEAR, ClipPlane::FAR];

/// Which planes the general clipping path runs against.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClipPlaneSet {
    #[default]
    Frustum,
    NearFar,
}

impl ClipPlaneSet {
    pub fn planes(self) -> &'static [ClipPlane] {
        match self {
            ClipPlaneSet::Frustum => &FRUSTUM_PLANES,
            ClipPlaneSet::NearFar => &NEAR_FAR_PLANES,
        }
    }
}

bitflags! {
    /// One bit per clip plane, set when a vertex is outside that plane.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Outcode: u8 {
        const NEAR   = 1 << 0;
        const FAR    = 1 << 1;
        const LEFT   = 1 << 2;
        const RIGHT  = 1 << 3;
        const BOTTOM = 1 << 4;
        const TOP    = 1 << 5;
    }
}

pub fn compute_outcode(vertex: &ClipSpaceVertex) -> Outcode {
    let p = vertex.pos_clip;
    let mut code = Outcode::empty();
    if p.z < 0.0 {
        code |= Outcode::NEAR;
    }
    if p.z > p.w {
        code |= Outcode::FAR;
    }
    if p.x < -p.w {
        code |= Outcode::LEFT;
    }
    if p.x > p.w {
        code |= Outcode::RIGHT;
    }
    if p.y < -p.w {
        code |= Outcode::BOTTOM;
    }
    if p.y > p.w {
        code |= Outcode::TOP;
    }
    code
}

// All three vertices share at least one outside region
pub fn trivial_reject(triangle: &ClipTriangle) -> bool {
    let [a, b, c] = &triangle.vertices;
    compute_outcode(a)
        .intersection(compute_outcode(b))
        .intersects(compute_outcode(c))
}

pub fn trivial_accept(triangle: &ClipTriangle) -> bool {
    let [a, b, c] = &triangle.vertices;
    (compute_outcode(a) | compute_outcode(b) | compute_outcode(c)).is_empty()
}

/// Intersects the edge `v0 -> v1` with `plane`, returning the new vertex and
/// the edge parameter `t`. Exactly one of the two vertices is expected to be
/// inside. Attributes are interpolated when both lists have the same length,
/// otherwise the attributes of `v0` are carried over.
pub fn intersect(
    plane: &ClipPlane,
    v0: &ClipSpaceVertex,
    v1: &ClipSpaceVertex,
) -> (ClipSpaceVertex, f32) {
    let d0 = plane.distance(v0);
    let d1 = plane.distance(v1);
    let denom = d0 - d1;
    let t = if denom == 0.0 {
        0.0
    } else {
        (d0 / denom).clamp(0.0, 1.0)
    };

    let pos_clip = v0.pos_clip + (v1.pos_clip - v0.pos_clip) * t;
    let attributes = if v0.attributes.len() == v1.attributes.len() {
        v0.attributes
            .iter()
            .zip(&v1.attributes)
            .map(|(a, b)| a + (b - a) * t)
            .collect()
    } else {
        v0.attributes.clone()
    };

    (ClipSpaceVertex { pos_clip, attributes }, t)
}

/// Clips a triangle against a single plane, producing 0, 1 or 2 triangles with
/// the input winding.
pub fn clip_against_plane(triangle: &ClipTriangle, plane: &ClipPlane) -> Vec<ClipTriangle> {
    let v = &triangle.vertices;
    let inside = [
        plane.is_inside(&v[0]),
        plane.is_inside(&v[1]),
        plane.is_inside(&v[2]),
    ];
    let inside_count = inside.iter().filter(|&&i| i).count();

    match inside_count {
        0 => Vec::new(),
        3 => vec![triangle.clone()],
        1 => {
            let i = inside.iter().position(|&i| i).unwrap_or(0);
            let curr = &v[i];
            let next = &v[(i + 1) % 3];
            let prev = &v[(i + 2) % 3];
            let (x_next, _) = intersect(plane, curr, next);
            let (x_prev, _) = intersect(plane, curr, prev);
            vec![ClipTriangle::new(curr.clone(), x_next, x_prev)]
        }
        _ => {
            // The outside vertex is the pivot. Walking the original order, the
            // clipped quad is in1, X1, X2, in2 where in1 precedes the pivot and
            // in2 follows it, so both halves keep the input winding.
            let o = inside.iter().position(|&i| !i).unwrap_or(0);
            let out = &v[o];
            let in1 = &v[(o + 2) % 3];
            let in2 = &v[(o + 1) % 3];
            let (x1, _) = intersect(plane, in1, out);
            let (x2, _) = intersect(plane, in2, out);
            vec![
                ClipTriangle::new(in1.clone(), x1.clone(), in2.clone()),
                ClipTriangle::new(x1, x2, in2.clone()),
            ]
        }
    }
}

/// Runs [`clip_against_plane`] over each plane in turn. Clipping a triangle
/// against the six frustum planes yields a convex polygon of at most nine
/// vertices, so the working set stays small.
pub fn clip_against_planes(triangle: &ClipTriangle, planes: &[ClipPlane]) -> Vec<ClipTriangle> {
    let mut working = vec![triangle.clone()];
    let mut next = Vec::with_capacity(8);

    for plane in planes {
        if working.is_empty() {
            break;
        }
        next.clear();
        for tri in &working {
            next.extend(clip_against_plane(tri, plane));
        }
        std::mem::swap(&mut working, &mut next);
    }

    working
}

/// Trivial reject, then trivial accept, then the general path.
pub fn clip_fast(triangle: &ClipTriangle, planes: &[ClipPlane]) -> Vec<ClipTriangle> {
    if trivial_reject(triangle) {
        return Vec::new();
    }
    if trivial_accept(triangle) {
        return vec![triangle.clone()];
    }
    clip_against_planes(triangle, planes)
}
