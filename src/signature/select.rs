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


//! Selection of the strongest wavelet coefficients.
//!
//! After the Haar transform, a channel's shape information is concentrated in
//! a handful of large-magnitude AC coefficients. This module picks the `n`
//! positions with the largest absolute values (the DC at position 0 is never
//! a candidate) and encodes each as a signed position: positive for a
//! positive coefficient, negative for a negative one.

/// Returns the `n` strongest AC positions of a transformed channel, signed by
/// coefficient sign.
///
/// Positions with an exactly-zero coefficient are never selected; if fewer
/// than `n` nonzero coefficients exist the result is padded with zeros, which
/// downstream validation treats as a degenerate image. Ties on magnitude
/// break toward the lower position, so selection is deterministic.
pub fn largest_coefs(plane: &[f64], n: usize) -> Vec<i16> {
    debug_assert!(plane.len() <= i16::MAX as usize + 1);

    let mut order: Vec<u16> = (1..plane.len() as u16)
        .filter(|&p| plane[p as usize] != 0.0)
        .collect();

    order.sort_unstable_by(|&a, &b| {
        plane[b as usize]
            .abs()
            .total_cmp(&plane[a as usize].abs())
            .then(a.cmp(&b))
    });
    order.truncate(n);

    let mut out: Vec<i16> = order
        .into_iter()
        .map(|p| {
            if plane[p as usize] < 0.0 {
                -(p as i16)
            } else {
                p as i16
            }
        })
        .collect();
    out.resize(n, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picks_by_magnitude() {
        //            DC    1     2     3    4     5
        let plane = [9.0, -0.5, 3.0, -7.0, 0.0, 1.5];
        assert_eq!(largest_coefs(&plane, 3), vec![-3, 2, 5]);
    }

    #[test]
    fn test_dc_excluded() {
        // The huge DC never shows up in the selection.
        let plane = [1000.0, 1.0, 2.0];
        assert_eq!(largest_coefs(&plane, 2), vec![2, 1]);
    }

    #[test]
    fn test_ties_break_low_position_first() {
        let plane = [0.0, 2.0, -2.0, 2.0];
        assert_eq!(largest_coefs(&plane, 2), vec![1, -2]);
    }

    #[test]
    fn test_zero_padding_for_flat_spectrum() {
        let plane = [5.0, 0.0, 0.0, 0.0];
        assert_eq!(largest_coefs(&plane, 3), vec![0, 0, 0]);

        let plane = [5.0, 0.0, -4.0, 0.0];
        assert_eq!(largest_coefs(&plane, 3), vec![-2, 0, 0]);
    }

    #[test]
    fn test_deterministic() {
        let plane: Vec<f64> = (0..64).map(|i| ((i * 37 + 11) % 13) as f64 - 6.0).collect();
        assert_eq!(largest_coefs(&plane, 10), largest_coefs(&plane, 10));
    }
}
