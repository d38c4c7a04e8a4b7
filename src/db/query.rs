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


//! Weighted coefficient-overlap scoring.
//!
//! A query walks only the buckets named by the probe signature: for each of
//! the probe's signed positions, every image in the matching bucket collects
//! a weight that depends on the channel and on how close the position sits to
//! the top-left (low-frequency) corner of the transformed plane. Scores are
//! seeded with a negative DC distance, so two images with similar overall
//! color start ahead before any coefficient is considered. Higher score means
//! more similar.

use crate::db::bucket::BucketManager;
use crate::db::StoredImage;
use crate::signature::{DcTriple, Signature};
use crate::{IMG_W, NUM_CHANNELS};
use std::collections::HashSet;

/// Number of magnitude tiers coefficient positions are bucketed into.
const NUM_TIERS: usize = 6;

/// Per-tier, per-channel scoring weights (Y, I, Q).
///
/// Tier 0 doubles as the weight of the DC seed term. One shared table serves
/// both signature insertion and query scoring; the two must never diverge.
const WEIGHTS: [[f64; NUM_CHANNELS]; NUM_TIERS] = [
    [5.00, 19.21, 34.37], // tier 0 (DC seed)
    [0.83, 1.26, 0.36],   // tier 1
    [1.01, 0.44, 0.45],   // tier 2
    [0.52, 0.53, 0.14],   // tier 3
    [0.47, 0.28, 0.18],   // tier 4
    [0.30, 0.14, 0.27],   // tier 5
];

/// Magnitude tier of an AC coefficient position.
///
/// Positions near the top-left corner of the transformed plane carry coarse
/// (large-scale) detail and weigh more; everything beyond the 5th diagonal
/// band shares the last tier.
#[inline]
fn tier(pos: u16) -> usize {
    let row = pos as usize / IMG_W;
    let col = pos as usize % IMG_W;
    row.max(col).min(NUM_TIERS - 1)
}

/// A single query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// User ID of the matched image.
    pub user_id: u64,
    /// Similarity score; higher is more similar.
    pub score: f64,
}

/// Parameters of a k-nearest query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Probe signature.
    pub sig: Signature,
    /// Probe DC triple.
    pub dc: DcTriple,
    /// Maximum number of hits to return.
    pub k: usize,
    /// User IDs to drop from the result.
    pub exclude: HashSet<u64>,
    /// Drop hits scoring below this value.
    pub min_score: Option<f64>,
}

impl QueryParams {
    /// Query for the `k` images most similar to the probe signature.
    #[must_use]
    pub fn new(sig: Signature, dc: DcTriple, k: usize) -> Self {
        Self {
            sig,
            dc,
            k,
            exclude: HashSet::new(),
            min_score: None,
        }
    }
}

/// Runs a query against the image array and the inverted index.
///
/// Internal IDs stay internal: results carry user IDs, ranked by descending
/// score with ties broken by insertion position (ascending internal ID).
pub(crate) fn execute(
    params: &QueryParams,
    images: &[StoredImage],
    buckets: &BucketManager,
) -> Vec<Match> {
    if params.k == 0 || images.is_empty() {
        return Vec::new();
    }

    // DC seed: negative weighted L1 distance on the color averages.
    let mut scores: Vec<f64> = images
        .iter()
        .map(|img| {
            -(0..NUM_CHANNELS)
                .map(|c| WEIGHTS[0][c] * (params.dc[c] - img.dc[c]).abs())
                .sum::<f64>()
        })
        .collect();

    // Coefficient overlap: each probe position credits every image sharing
    // that signed position.
    for (chan, positions) in params.sig.coefs.iter().enumerate() {
        for &pos in positions {
            if pos == 0 {
                continue;
            }
            let w = WEIGHTS[tier(pos.unsigned_abs())][chan];
            for &id in buckets.members(chan, pos) {
                scores[id as usize] += w;
            }
        }
    }

    let mut ranked: Vec<(u32, f64)> = scores
        .into_iter()
        .enumerate()
        .map(|(id, score)| (id as u32, score))
        .filter(|&(id, score)| {
            !params.exclude.contains(&images[id as usize].user_id)
                && params.min_score.is_none_or(|min| score >= min)
        })
        .collect();

    ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(params.k);

    ranked
        .into_iter()
        .map(|(id, score)| Match {
            user_id: images[id as usize].user_id,
            score,
        })
        .collect()
}

/// The score a signature earns against an identical stored image: zero DC
/// distance plus the full weight of every coefficient.
#[cfg(test)]
pub(crate) fn self_match_score(sig: &Signature) -> f64 {
    sig.coefs
        .iter()
        .enumerate()
        .flat_map(|(chan, positions)| {
            positions
                .iter()
                .filter(|&&pos| pos != 0)
                .map(move |&pos| WEIGHTS[tier(pos.unsigned_abs())][chan])
        })
        .sum()
}
