// Depth buffer shared by the tile tasks of a frame. Out-of-range reads return
// the far plane and out-of-range writes are dropped.

use parking_lot::Mutex;

pub const DEPTH_FAR: f32 = 1.0;

/// Comparison used by the depth and stencil tests, as
/// `incoming <op> stored`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunc {
    #[inline]
    pub fn compare<T: PartialOrd>(self, incoming: T, stored: T) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Less => incoming < stored,
            CompareFunc::Equal => incoming == stored,
            CompareFunc::LessEqual => incoming <= stored,
            CompareFunc::Greater => incoming > stored,
            CompareFunc::NotEqual => incoming != stored,
            CompareFunc::GreaterEqual => incoming >= stored,
            CompareFunc::Always => true,
        }
    }
}

pub struct DepthBuffer {
    width: usize,
    height: usize,
    data: Mutex<Vec<f32>>,
}

impl DepthBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: Mutex::new(vec![DEPTH_FAR; width * height]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    pub fn clear(&self, value: f32) {
        self.data.lock().fill(value);
    }

    // Reallocates to the new size, filled with the far value
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        *self.data.get_mut() = vec![DEPTH_FAR; width * height];
    }

    pub fn get(&self, x: i32, y: i32) -> f32 {
        match self.index(x, y) {
            Some(index) => self.data.lock()[index],
            None => DEPTH_FAR,
        }
    }

    pub fn set(&self, x: i32, y: i32, depth: f32) {
        if let Some(index) = self.index(x, y) {
            self.data.lock()[index] = depth;
        }
    }

    pub fn test(&self, x: i32, y: i32, depth: f32, func: CompareFunc) -> bool {
        func.compare(depth, self.get(x, y))
    }

    /// Compares `depth` against the stored value and, if the test passes and
    /// `write` is set, stores it. Both happen under one lock.
    pub fn test_and_set(&self, x: i32, y: i32, depth: f32, func: CompareFunc, write: bool) -> bool {
        let Some(index) = self.index(x, y) else {
            return func.compare(depth, DEPTH_FAR);
        };
        let mut data = self.data.lock();
        let passed = func.compare(depth, data[index]);
        if passed && write {
            data[index] = depth;
        }
        passed
    }

    // Row-major copy of the buffer contents
    pub fn get_data(&self) -> Vec<f32> {
        self.data.lock().clone()
    }
}
