use glam::{Vec2, Vec3, Vec4};

// A vertex as it leaves the vertex stage, before clipping
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSpaceVertex {
    pub pos_clip: Vec4,
    pub attributes: Vec<f32>,
}

impl ClipSpaceVertex {
    pub fn new(pos_clip: Vec4, attributes: Vec<f32>) -> Self {
        Self {
            pos_clip,
            attributes,
        }
    }

    pub fn from_position(pos_clip: Vec4) -> Self {
        Self {
            pos_clip,
            attributes: Vec::new(),
        }
    }

    // Returns the position after perspective divide, or None if w is not positive
    pub fn ndc(&self) -> Option<Vec3> {
        if self.pos_clip.w <= 0.0 {
            return None;
        }
        Some(self.pos_clip.truncate() / self.pos_clip.w)
    }

    /// Projects the vertex to pixel space for a `width` x `height` surface.
    ///
    /// The y axis is flipped so that row 0 is the top of the surface. Attributes
    /// are divided by w so they can be interpolated linearly in screen space and
    /// recovered with the interpolated reciprocal w.
    pub fn to_screen(&self, width: f32, height: f32) -> ScreenVertex {
        let one_over_w = 1.0 / self.pos_clip.w;
        let ndc = self.pos_clip * one_over_w;

        let screen_x = (ndc.x + 1.0) * width / 2.0;
        let screen_y = (1.0 - ndc.y) * height / 2.0;

        ScreenVertex {
            pos_screen: Vec3::new(screen_x, screen_y, ndc.z),
            one_over_w,
            attributes_over_w: self.attributes.iter().map(|a| a * one_over_w).collect(),
        }
    }
}

// A vertex in pixel space, ready for binning and scan conversion
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenVertex {
    // x and y in pixels, z is normalized depth in [0, 1]
    pub pos_screen: Vec3,
    pub one_over_w: f32,
    pub attributes_over_w: Vec<f32>,
}

impl ScreenVertex {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            pos_screen: Vec3::new(x, y, z),
            one_over_w: 1.0,
            attributes_over_w: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<f32>) -> Self {
        self.attributes_over_w = attributes.iter().map(|a| a * self.one_over_w).collect();
        self
    }

    #[inline]
    pub fn xy(&self) -> Vec2 {
        self.pos_screen.truncate()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClipTriangle {
    pub vertices: [ClipSpaceVertex; 3],
}

impl ClipTriangle {
    pub fn new(v0: ClipSpaceVertex, v1: ClipSpaceVertex, v2: ClipSpaceVertex) -> Self {
        Self {
            vertices: [v0, v1, v2],
        }
    }

    pub fn from_positions(p0: Vec4, p1: Vec4, p2: Vec4) -> Self {
        Self::new(
            ClipSpaceVertex::from_position(p0),
            ClipSpaceVertex::from_position(p1),
            ClipSpaceVertex::from_position(p2),
        )
    }

    pub fn to_screen(&self, width: f32, height: f32) -> Triangle {
        Triangle {
            vertices: [
                self.vertices[0].to_screen(width, height),
                self.vertices[1].to_screen(width, height),
                self.vertices[2].to_screen(width, height),
            ],
        }
    }
}

// A triangle in pixel space. Winding is significant.
#[derive(Clone, Debug, PartialEq)]
pub struct Triangle {
    pub vertices: [ScreenVertex; 3],
}

impl Triangle {
    pub fn new(v0: ScreenVertex, v1: ScreenVertex, v2: ScreenVertex) -> Self {
        Self {
            vertices: [v0, v1, v2],
        }
    }

    /// Twice the signed area in pixel space (`e1 x e2`). Positive when the
    /// vertices run clockwise on screen, since y points down.
    pub fn signed_area_x2(&self) -> f32 {
        let p0 = self.vertices[0].xy();
        let p1 = self.vertices[1].xy();
        let p2 = self.vertices[2].xy();
        (p1 - p0).perp_dot(p2 - p0)
    }

    // Pixel space bounding box as (min, max)
    pub fn bounds(&self) -> (Vec2, Vec2) {
        let p0 = self.vertices[0].xy();
        let p1 = self.vertices[1].xy();
        let p2 = self.vertices[2].xy();
        (p0.min(p1).min(p2), p0.max(p1).max(p2))
    }
}
