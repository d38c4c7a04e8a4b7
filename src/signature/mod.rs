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


//! Perceptual image signatures.
//!
//! A signature is the compact fingerprint the database indexes: per YIQ
//! channel, the [`crate::NUM_COEFS`] positions of the largest-magnitude AC
//! wavelet coefficients, each signed by the coefficient's sign, plus the
//! three DC terms and the original resolution.
//!
//! # Extraction Pipeline
//!
//! 1. Decode, rescale to 128x128, export YIQ planes ([`crate::decode`])
//! 2. 2D Haar transform per plane ([`haar`])
//! 3. Record `dc[c] = plane[0]`
//! 4. Select the strongest signed AC positions per plane ([`select`])
//! 5. Reject signatures containing a zero slot (flat spectrum)

pub mod haar;
pub mod select;

use crate::decode::decode_yiq;
use crate::error::{HaarDbError, Result};
use crate::{IMG_H, IMG_W, NUM_CHANNELS, NUM_COEFS};
use std::path::Path;

/// The three DC (position-0) values, one per YIQ channel.
pub type DcTriple = [f64; NUM_CHANNELS];

/// Original image dimensions, before rescaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels (saturated at `u16::MAX`).
    pub width: u16,
    /// Height in pixels (saturated at `u16::MAX`).
    pub height: u16,
}

/// Signed AC coefficient positions, one row per YIQ channel.
///
/// Every entry is in `[-(NUM_PIXELS - 1), -1]` or `[1, NUM_PIXELS - 1]`: the
/// magnitude is the coefficient position, the sign is the coefficient's
/// sign. Zero never appears in a valid signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signed positions per channel, strongest first.
    pub coefs: [[i16; NUM_COEFS]; NUM_CHANNELS],
}

impl Signature {
    /// Compares two signatures as per-channel multisets of signed positions,
    /// ignoring selection order.
    #[must_use]
    pub fn same_positions(&self, other: &Self) -> bool {
        for c in 0..NUM_CHANNELS {
            let mut a = self.coefs[c];
            let mut b = other.coefs[c];
            a.sort_unstable();
            b.sort_unstable();
            if a != b {
                return false;
            }
        }
        true
    }
}

/// A full per-image record: identity, signature, DC triple, and resolution.
///
/// This is the unit the database stores and the persistence layer writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Externally meaningful image identifier.
    pub user_id: u64,
    /// Signed coefficient positions.
    pub sig: Signature,
    /// DC value per channel.
    pub dc: DcTriple,
    /// Original resolution.
    pub res: Resolution,
}

impl ImageRecord {
    /// Runs the full signature extraction pipeline on an image file.
    ///
    /// The returned record has `user_id` 0; the caller assigns the real ID
    /// before inserting it anywhere.
    ///
    /// # Errors
    ///
    /// - [`HaarDbError::Decode`] if the file cannot be decoded.
    /// - [`HaarDbError::DegenerateImage`] if any channel has fewer than
    ///   [`NUM_COEFS`] nonzero AC coefficients. Constant images and
    ///   fully-achromatic images fall in this category.
    pub fn extract<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut decoded = decode_yiq(path)?;

        let mut dc: DcTriple = [0.0; NUM_CHANNELS];
        let mut coefs = [[0i16; NUM_COEFS]; NUM_CHANNELS];

        for (c, plane) in decoded.channels.iter_mut().enumerate() {
            haar::haar_2d(plane, IMG_W, IMG_H);
            dc[c] = plane[0];

            let selected = select::largest_coefs(plane, NUM_COEFS);
            if selected.contains(&0) {
                return Err(HaarDbError::DegenerateImage(path.to_path_buf()));
            }
            coefs[c].copy_from_slice(&selected);
        }

        Ok(Self {
            user_id: 0,
            sig: Signature { coefs },
            dc,
            res: decoded.res,
        })
    }
}
