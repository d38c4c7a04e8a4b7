// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! 2D standard Haar wavelet decomposition.
//!
//! The standard (separable) form transforms every row completely, then every
//! column completely. A 1D pass repeatedly halves the active prefix: adjacent
//! pairs `(a, b)` become the sum `(a + b)/sqrt(2)` and the difference
//! `(a - b)/sqrt(2)`, with sums packed into the first half of the prefix and
//! differences into the second half, until a single sample remains. The DC
//! coefficient (the mean scaled by `sqrt(w * h)`) ends up at index 0.

use std::f64::consts::FRAC_1_SQRT_2;

/// In-place 2D standard Haar transform of a row-major `w` x `h` array.
///
/// # Panics
///
/// Panics if `w` or `h` is not a power of two, or if `data` is shorter than
/// `w * h`. Dimension violations are programming errors here, not runtime
/// conditions.
pub fn haar_2d(data: &mut [f64], w: usize, h: usize) {
    assert!(
        w.is_power_of_two() && h.is_power_of_two(),
        "Haar transform requires power-of-two dimensions, got {w}x{h}"
    );
    assert!(data.len() >= w * h, "channel plane shorter than {w}x{h}");

    let mut scratch = vec![0.0f64; w.max(h)];

    for row in 0..h {
        haar_1d(&mut data[row * w..], 1, w, &mut scratch);
    }
    for col in 0..w {
        haar_1d(&mut data[col..], w, h, &mut scratch);
    }
}

/// One full 1D Haar decomposition over `len` samples spaced `stride` apart.
fn haar_1d(data: &mut [f64], stride: usize, len: usize, scratch: &mut [f64]) {
    let mut active = len;
    while active > 1 {
        let half = active / 2;
        for i in 0..half {
            let a = data[2 * i * stride];
            let b = data[(2 * i + 1) * stride];
            scratch[i] = (a + b) * FRAC_1_SQRT_2;
            scratch[half + i] = (a - b) * FRAC_1_SQRT_2;
        }
        for (i, &v) in scratch[..active].iter().enumerate() {
            data[i * stride] = v;
        }
        active = half;
    }
}
