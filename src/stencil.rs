// Stencil buffer and per-fragment stencil ops. Out-of-range reads return 0.

use crate::depth::CompareFunc;
use parking_lot::Mutex;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

impl StencilOp {
    // New value before the write mask is applied
    #[inline]
    pub fn evaluate(self, current: u8, reference: u8) -> u8 {
        match self {
            StencilOp::Keep => current,
            StencilOp::Zero => 0,
            StencilOp::Replace => reference,
            StencilOp::IncrementClamp => current.saturating_add(1),
            StencilOp::DecrementClamp => current.saturating_sub(1),
            StencilOp::Invert => !current,
            StencilOp::IncrementWrap => current.wrapping_add(1),
            StencilOp::DecrementWrap => current.wrapping_sub(1),
        }
    }
}

/// Applies `op` to `current` and keeps the bits outside `write_mask`.
#[inline]
pub fn apply_stencil_op(op: StencilOp, current: u8, reference: u8, write_mask: u8) -> u8 {
    let new = op.evaluate(current, reference);
    (current & !write_mask) | (new & write_mask)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StencilState {
    pub enabled: bool,
    pub read_mask: u8,
    pub write_mask: u8,
    // Compared as `(reference & read_mask) <func> (stored & read_mask)`
    pub compare: CompareFunc,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub reference: u8,
}

impl StencilState {
    pub const DEFAULT: Self = Self {
        enabled: false,
        read_mask: 0xFF,
        write_mask: 0xFF,
        compare: CompareFunc::Always,
        fail_op: StencilOp::Keep,
        depth_fail_op: StencilOp::Keep,
        pass_op: StencilOp::Keep,
        reference: 0,
    };

    #[inline]
    pub fn passes(&self, stored: u8) -> bool {
        self.compare
            .compare(self.reference & self.read_mask, stored & self.read_mask)
    }

    // Picks the operation for the outcome of the stencil and depth tests
    #[inline]
    pub fn select_op(&self, stencil_passed: bool, depth_passed: bool) -> StencilOp {
        if !stencil_passed {
            self.fail_op
        } else if !depth_passed {
            self.depth_fail_op
        } else {
            self.pass_op
        }
    }
}

impl Default for StencilState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct StencilBuffer {
    width: usize,
    height: usize,
    data: Mutex<Vec<u8>>,
}

impl StencilBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: Mutex::new(vec![0; width * height]),
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

    pub fn clear(&self, value: u8) {
        self.data.lock().fill(value);
    }

    // Reallocates and zero-fills
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        *self.data.get_mut() = vec![0; width * height];
    }

    pub fn get(&self, x: i32, y: i32) -> u8 {
        match self.index(x, y) {
            Some(index) => self.data.lock()[index],
            None => 0,
        }
    }

    pub fn set(&self, x: i32, y: i32, value: u8) {
        if let Some(index) = self.index(x, y) {
            self.data.lock()[index] = value;
        }
    }

    pub fn test(&self, x: i32, y: i32, state: &StencilState) -> bool {
        state.passes(self.get(x, y))
    }

    pub fn apply(&self, x: i32, y: i32, op: StencilOp, reference: u8, write_mask: u8) {
        if let Some(index) = self.index(x, y) {
            let mut data = self.data.lock();
            data[index] = apply_stencil_op(op, data[index], reference, write_mask);
        }
    }

    /// Runs the stencil test for one fragment and applies the fail, depth-fail
    /// or pass operation under a single lock. Returns whether the stencil test
    /// passed, regardless of `depth_passed`. A disabled state always passes and
    /// leaves the buffer untouched.
    pub fn test_and_apply(&self, x: i32, y: i32, depth_passed: bool, state: &StencilState) -> bool {
        if !state.enabled {
            return true;
        }
        let Some(index) = self.index(x, y) else {
            return state.passes(0);
        };

        let mut data = self.data.lock();
        let current = data[index];
        let passed = state.passes(current);
        let op = state.select_op(passed, depth_passed);
        data[index] = apply_stencil_op(op, current, state.reference, state.write_mask);
        passed
    }

    // Row-major copy of the buffer contents
    pub fn get_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(compare: CompareFunc, reference: u8) -> StencilState {
        StencilState {
            enabled: true,
            compare,
            reference,
            ..StencilState::DEFAULT
        }
    }

    #[test]
    fn test_op_table() {
        assert_eq!(StencilOp::Keep.evaluate(7, 3), 7);
        assert_eq!(StencilOp::Zero.evaluate(7, 3), 0);
        assert_eq!(StencilOp::Replace.evaluate(7, 3), 3);
        assert_eq!(StencilOp::IncrementClamp.evaluate(7, 3), 8);
        assert_eq!(StencilOp::IncrementClamp.evaluate(255, 3), 255);
        assert_eq!(StencilOp::DecrementClamp.evaluate(0, 3), 0);
        assert_eq!(StencilOp::DecrementClamp.evaluate(7, 3), 6);
        assert_eq!(StencilOp::Invert.evaluate(0b1010_0101, 3), 0b0101_1010);
        assert_eq!(StencilOp::IncrementWrap.evaluate(255, 3), 0);
        assert_eq!(StencilOp::DecrementWrap.evaluate(0, 3), 255);
    }

    #[test]
    fn test_write_mask_merge() {
        // Only the low nibble is writable
        assert_eq!(apply_stencil_op(StencilOp::Replace, 0xA0, 0x0F, 0x0F), 0xAF);
        assert_eq!(apply_stencil_op(StencilOp::Zero, 0xFF, 0, 0xF0), 0x0F);
        assert_eq!(apply_stencil_op(StencilOp::Invert, 0x00, 0, 0x00), 0x00);
    }

    #[test]
    fn test_buffer_apply_clamp_and_wrap() {
        let stencil = StencilBuffer::new(2, 2);
        stencil.set(0, 0, 255);
        stencil.apply(0, 0, StencilOp::IncrementClamp, 0, 0xFF);
        assert_eq!(stencil.get(0, 0), 255);
        stencil.apply(1, 0, StencilOp::DecrementWrap, 0, 0xFF);
        assert_eq!(stencil.get(1, 0), 255);
    }

    #[test]
    fn test_read_mask_applies_to_both_sides() {
        let stencil = StencilBuffer::new(1, 1);
        stencil.set(0, 0, 0xF3);
        let state = StencilState {
            read_mask: 0x0F,
            ..enabled(CompareFunc::Equal, 0x03)
        };
        assert!(stencil.test(0, 0, &state));
        let state = StencilState {
            read_mask: 0xFF,
            ..state
        };
        assert!(!stencil.test(0, 0, &state));
    }

    #[test]
    fn test_and_apply_selects_op() {
        let stencil = StencilBuffer::new(1, 1);
        let state = StencilState {
            fail_op: StencilOp::Replace,
            depth_fail_op: StencilOp::IncrementClamp,
            pass_op: StencilOp::Invert,
            ..enabled(CompareFunc::Equal, 5)
        };

        // Stored 0 != 5, fail op writes the reference
        assert!(!stencil.test_and_apply(0, 0, true, &state));
        assert_eq!(stencil.get(0, 0), 5);

        // Stencil passes, depth fails
        assert!(stencil.test_and_apply(0, 0, false, &state));
        assert_eq!(stencil.get(0, 0), 6);

        // Both pass
        stencil.set(0, 0, 5);
        assert!(stencil.test_and_apply(0, 0, true, &state));
        assert_eq!(stencil.get(0, 0), !5u8);
    }

    #[test]
    fn test_and_apply_disabled_is_noop() {
        let stencil = StencilBuffer::new(1, 1);
        let state = StencilState {
            pass_op: StencilOp::Replace,
            reference: 9,
            ..StencilState::DEFAULT
        };
        assert!(stencil.test_and_apply(0, 0, true, &state));
        assert_eq!(stencil.get(0, 0), 0);
    }

    #[test]
    fn test_default_state() {
        let state = StencilState::default();
        assert!(!state.enabled);
        assert_eq!(state.read_mask, 0xFF);
        assert_eq!(state.write_mask, 0xFF);
        assert_eq!(state.compare, CompareFunc::Always);
        assert_eq!(state.fail_op, StencilOp::Keep);
        assert_eq!(state.depth_fail_op, StencilOp::Keep);
        assert_eq!(state.pass_op, StencilOp::Keep);
        assert_eq!(state.reference, 0);
    }

    #[test]
    fn test_out_of_range() {
        let mut stencil = StencilBuffer::new(2, 2);
        stencil.set(5, 5, 9);
        stencil.apply(-1, 0, StencilOp::Replace, 9, 0xFF);
        assert_eq!(stencil.get(5, 5), 0);
        assert!(stencil.get_data().iter().all(|&v| v == 0));
        stencil.clear(3);
        stencil.resize(3, 3);
        assert_eq!(stencil.get_data(), vec![0; 9]);
    }
}
