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


//! Image decoding and color space conversion.
//!
//! This module is the boundary to the raw image decoder. It loads a file,
//! rescales it to the fixed signature resolution, and exports the pixels as
//! three parallel real-valued YIQ channel planes ready for the wavelet
//! transform. The original (pre-rescale) resolution is reported alongside.
//!
//! # Color Space
//!
//! YIQ is the NTSC luminance/chrominance space: Y carries brightness, I and Q
//! carry color difference. The conversion is a fixed matrix over 8-bit RGB:
//!
//! ```text
//! Y = 0.299 R + 0.587 G + 0.114 B
//! I = 0.596 R - 0.274 G - 0.322 B
//! Q = 0.211 R - 0.523 G + 0.312 B
//! ```

use crate::error::{HaarDbError, Result};
use crate::signature::Resolution;
use crate::{IMG_H, IMG_W, NUM_PIXELS};
use image::imageops::FilterType;
use std::path::Path;

/// A decoded image: three YIQ channel planes at signature resolution, plus
/// the resolution of the original file.
#[derive(Debug)]
pub struct DecodedImage {
    /// Row-major channel planes of length [`NUM_PIXELS`]: Y, I, Q.
    pub channels: [Vec<f64>; 3],
    /// Width and height of the file before rescaling.
    pub res: Resolution,
}

/// Loads an image file and exports it as YIQ channel planes.
///
/// The image is rescaled to [`IMG_W`]x[`IMG_H`] with a triangle filter unless
/// it already has exactly those dimensions. Dimensions above `u16::MAX` are
/// reported saturated in the returned resolution.
///
/// # Errors
///
/// Returns [`HaarDbError::Decode`] if the file cannot be read or parsed.
pub fn decode_yiq<P: AsRef<Path>>(path: P) -> Result<DecodedImage> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| HaarDbError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let res = Resolution {
        width: img.width().min(u32::from(u16::MAX)) as u16,
        height: img.height().min(u32::from(u16::MAX)) as u16,
    };

    let rgb = if img.width() as usize == IMG_W && img.height() as usize == IMG_H {
        img.into_rgb8()
    } else {
        img.resize_exact(IMG_W as u32, IMG_H as u32, FilterType::Triangle)
            .into_rgb8()
    };

    let mut y_plane = Vec::with_capacity(NUM_PIXELS);
    let mut i_plane = Vec::with_capacity(NUM_PIXELS);
    let mut q_plane = Vec::with_capacity(NUM_PIXELS);

    for pixel in rgb.pixels() {
        let (y, i, q) = rgb_to_yiq(pixel[0], pixel[1], pixel[2]);
        y_plane.push(y);
        i_plane.push(i);
        q_plane.push(q);
    }

    Ok(DecodedImage {
        channels: [y_plane, i_plane, q_plane],
        res,
    })
}

/// Converts a single 8-bit RGB pixel to YIQ.
///
/// Inputs are in `0..=255`; Y ends up in `[0, 255]` and I/Q straddle zero.
#[inline]
fn rgb_to_yiq(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = f64::from(r);
    let g = f64::from(g);
    let b = f64::from(b);

    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let i = 0.596 * r - 0.274 * g - 0.322 * b;
    let q = 0.211 * r - 0.523 * g + 0.312 * b;

    (y, i, q)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_image(name: &str, img: &image::RgbImage) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "haardb_decode_{}_{}.bmp",
            name,
            std::process::id()
        ));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_yiq_grays() {
        // Achromatic pixels have zero chrominance and Y equal to the level.
        let (y, i, q) = rgb_to_yiq(255, 255, 255);
        assert!((y - 255.0).abs() < 1e-9);
        assert!(i.abs() < 1e-9);
        assert!(q.abs() < 1e-9);

        let (y, i, q) = rgb_to_yiq(0, 0, 0);
        assert_eq!((y, i, q), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_yiq_primaries() {
        let (y, i, q) = rgb_to_yiq(255, 0, 0);
        assert!((y - 0.299 * 255.0).abs() < 1e-9);
        assert!((i - 0.596 * 255.0).abs() < 1e-9);
        assert!((q - 0.211 * 255.0).abs() < 1e-9);

        // Blue pushes I negative and Q positive.
        let (_, i, q) = rgb_to_yiq(0, 0, 255);
        assert!(i < 0.0);
        assert!(q > 0.0);
    }

    #[test]
    fn test_decode_thin_line_bmp() {
        // A 10x1 strip: white with a dark head pixel, so the rescaled image
        // still carries detail.
        let strip = image::RgbImage::from_fn(10, 1, |x, _| {
            if x == 0 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let path = temp_image("thin_line", &strip);

        let decoded = decode_yiq(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(decoded.res.width, 10);
        assert_eq!(decoded.res.height, 1);
        for plane in &decoded.channels {
            assert_eq!(plane.len(), NUM_PIXELS);
        }

        // The luma plane is not flat and its average is nonzero.
        let y = &decoded.channels[0];
        let sum: f64 = y.iter().sum();
        assert!(sum > 0.0);
        assert!(y.iter().any(|&v| (v - y[0]).abs() > 1e-6));
    }

    #[test]
    fn test_decode_exact_size_skips_rescale() {
        let img = image::RgbImage::from_fn(IMG_W as u32, IMG_H as u32, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 7])
        });
        let path = temp_image("exact", &img);

        let decoded = decode_yiq(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(decoded.res.width, IMG_W as u16);
        assert_eq!(decoded.res.height, IMG_H as u16);

        // First pixel is (0, 0, 7); check the exact conversion survived.
        let (y, i, q) = rgb_to_yiq(0, 0, 7);
        assert!((decoded.channels[0][0] - y).abs() < 1e-9);
        assert!((decoded.channels[1][0] - i).abs() < 1e-9);
        assert!((decoded.channels[2][0] - q).abs() < 1e-9);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_yiq("/nonexistent/haardb_missing.png").unwrap_err();
        assert!(matches!(err, HaarDbError::Decode { .. }));
    }
}
