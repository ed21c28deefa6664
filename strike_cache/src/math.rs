// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mathematical helper functions.

// From <https://github.com/linebender/tiny-skia/blob/68b198a7210a6bbf752b43d6bc4db62445730313/path/src/scalar.rs#L12>
const SCALAR_NEARLY_ZERO: f32 = 1.0 / (1 << 12) as f32;

/// Matrix entries keep this many steps per unit once relaxed.
const RELAX_STEPS: f32 = 1024.0;

/// A number of useful methods for f32 numbers.
pub(crate) trait FloatExt: Sized + Copy {
    /// Whether the number is approximately 0.
    fn is_nearly_zero(self) -> bool {
        self.is_nearly_zero_within_tolerance(SCALAR_NEARLY_ZERO)
    }

    /// Whether the number is approximately 0, with a given tolerance.
    fn is_nearly_zero_within_tolerance(self, tolerance: f32) -> bool;

    /// Maps `-0.0` to `0.0` and every NaN to a single bit pattern, so that values which compare
    /// equal also serialize to equal bytes.
    fn canonical(self) -> Self;

    /// Rounds to a fixed grid of `1/1024`, absorbing the noise that different matrix
    /// concatenation orders leave in the low bits.
    fn relax(self) -> Self;
}

impl FloatExt for f32 {
    #[inline(always)]
    fn is_nearly_zero_within_tolerance(self, tolerance: f32) -> bool {
        debug_assert!(tolerance >= 0.0, "tolerance must be positive");

        self.abs() <= tolerance
    }

    #[inline]
    fn canonical(self) -> Self {
        if self == 0.0 {
            0.0
        } else if self.is_nan() {
            Self::NAN
        } else {
            self
        }
    }

    #[inline]
    fn relax(self) -> Self {
        ((self * RELAX_STEPS).round() / RELAX_STEPS).canonical()
    }
}
