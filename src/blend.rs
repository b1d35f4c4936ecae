// Color blending on RGBA in [0, 1], with separate RGB and alpha equations

use glam::{Vec3, Vec4};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    Src,
    OneMinusSrc,
    SrcAlpha,
    OneMinusSrcAlpha,
    Dst,
    OneMinusDst,
    DstAlpha,
    OneMinusDstAlpha,
    // min(src.a, 1 - dst.a) for RGB, 1 for alpha
    SrcAlphaSaturated,
    Constant,
    OneMinusConstant,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOperation {
    #[inline]
    fn combine<T>(self, src: T, dst: T) -> T
    where
        T: std::ops::Add<Output = T> + std::ops::Sub<Output = T> + MinMax,
    {
        match self {
            BlendOperation::Add => src + dst,
            BlendOperation::Subtract => src - dst,
            BlendOperation::ReverseSubtract => dst - src,
            BlendOperation::Min => src.min_of(dst),
            BlendOperation::Max => src.max_of(dst),
        }
    }
}

// Lets one combine routine serve both the RGB and the alpha term
trait MinMax {
    fn min_of(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
}

impl MinMax for f32 {
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl MinMax for Vec3 {
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl BlendFactor {
    fn rgb(self, src: Vec4, dst: Vec4, constant: Vec4) -> Vec3 {
        match self {
            BlendFactor::Zero => Vec3::ZERO,
            BlendFactor::One => Vec3::ONE,
            BlendFactor::Src => src.truncate(),
            BlendFactor::OneMinusSrc => Vec3::ONE - src.truncate(),
            BlendFactor::SrcAlpha => Vec3::splat(src.w),
            BlendFactor::OneMinusSrcAlpha => Vec3::splat(1.0 - src.w),
            BlendFactor::Dst => dst.truncate(),
            BlendFactor::OneMinusDst => Vec3::ONE - dst.truncate(),
            BlendFactor::DstAlpha => Vec3::splat(dst.w),
            BlendFactor::OneMinusDstAlpha => Vec3::splat(1.0 - dst.w),
            BlendFactor::SrcAlphaSaturated => Vec3::splat(src.w.min(1.0 - dst.w)),
            BlendFactor::Constant => constant.truncate(),
            BlendFactor::OneMinusConstant => Vec3::ONE - constant.truncate(),
        }
    }

    fn alpha(self, src: Vec4, dst: Vec4, constant: Vec4) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::One | BlendFactor::SrcAlphaSaturated => 1.0,
            BlendFactor::Src | BlendFactor::SrcAlpha => src.w,
            BlendFactor::OneMinusSrc | BlendFactor::OneMinusSrcAlpha => 1.0 - src.w,
            BlendFactor::Dst | BlendFactor::DstAlpha => dst.w,
            BlendFactor::OneMinusDst | BlendFactor::OneMinusDstAlpha => 1.0 - dst.w,
            BlendFactor::Constant => constant.w,
            BlendFactor::OneMinusConstant => 1.0 - constant.w,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOperation,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOperation,
    pub constant: Vec4,
}

impl BlendState {
    // out = src
    pub const DISABLED: Self = Self {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    // out = src * src.a + dst * (1 - src.a), non-premultiplied alpha
    pub const SOURCE_OVER: Self = Self {
        enabled: true,
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    // out = src + dst * (1 - src.a)
    pub const PREMULTIPLIED: Self = Self {
        enabled: true,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    // out = src + dst
    pub const ADDITIVE: Self = Self {
        enabled: true,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::One,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::One,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    // out = src * dst
    pub const MULTIPLY: Self = Self {
        enabled: true,
        src_color: BlendFactor::Dst,
        dst_color: BlendFactor::Zero,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::DstAlpha,
        dst_alpha: BlendFactor::Zero,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    // out = src + dst * (1 - src)
    pub const SCREEN: Self = Self {
        enabled: true,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::OneMinusSrc,
        color_op: BlendOperation::Add,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
        alpha_op: BlendOperation::Add,
        constant: Vec4::ZERO,
    };

    pub fn with_constant(mut self, constant: Vec4) -> Self {
        self.constant = constant;
        self
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Combines `src` (the incoming fragment) with `dst` (the stored color).
pub fn blend(src: Vec4, dst: Vec4, state: &BlendState) -> Vec4 {
    if !state.enabled {
        return src;
    }

    let constant = state.constant;
    let src_rgb = src.truncate() * state.src_color.rgb(src, dst, constant);
    let dst_rgb = dst.truncate() * state.dst_color.rgb(src, dst, constant);
    let src_a = src.w * state.src_alpha.alpha(src, dst, constant);
    let dst_a = dst.w * state.dst_alpha.alpha(src, dst, constant);

    let rgb = state.color_op.combine(src_rgb, dst_rgb);
    let a = state.alpha_op.combine(src_a, dst_a);

    rgb.extend(a).clamp(Vec4::ZERO, Vec4::ONE)
}

pub fn unpack_rgba8(rgba8: [u8; 4]) -> Vec4 {
    Vec4::new(
        rgba8[0] as f32 / 255.0,
        rgba8[1] as f32 / 255.0,
        rgba8[2] as f32 / 255.0,
        rgba8[3] as f32 / 255.0,
    )
}

// Clamps to [0, 1] then truncates
pub fn pack_rgba8(color: Vec4) -> [u8; 4] {
    let c = color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
    [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
}

pub fn blend_rgba8(src: [u8; 4], dst: [u8; 4], state: &BlendState) -> [u8; 4] {
    // Skip the float round trip, truncation could lose a step
    if !state.enabled {
        return src;
    }
    pack_rgba8(blend(unpack_rgba8(src), unpack_rgba8(dst), state))
}

// Packed 0xRRGGBBAA
pub fn blend_packed(src: u32, dst: u32, state: &BlendState) -> u32 {
    u32::from_be_bytes(blend_rgba8(src.to_be_bytes(), dst.to_be_bytes(), state))
}
