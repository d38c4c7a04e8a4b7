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


//! The inverted coefficient index.
//!
//! For every `(channel, sign, position)` triple the manager keeps the list of
//! internal IDs whose signature contains that signed position. A query only
//! ever touches the buckets named by the probe signature, so its cost is
//! independent of how many of the database's coefficients it does not share.
//!
//! A dense signature mirror (`sigs`, indexed by internal ID) makes removal
//! and re-keying O(coefficients-per-signature) instead of a full index scan.

use crate::db::InternId;
use crate::signature::Signature;
use crate::{NUM_CHANNELS, NUM_PIXELS};

/// Inverted index from signed coefficient positions to internal IDs.
///
/// Invariant: `id` is a member of the bucket for `(c, s)` iff `s` appears in
/// `sigs[id].coefs[c]`.
pub(crate) struct BucketManager {
    /// Flat `NUM_CHANNELS x 2 x NUM_PIXELS` bucket array; membership lists
    /// are unordered.
    buckets: Vec<Vec<InternId>>,
    /// Signature mirror, indexed by internal ID.
    sigs: Vec<Signature>,
}

/// Flat index of the bucket for a signed position in a channel.
#[inline]
fn bucket_index(chan: usize, signed_pos: i16) -> usize {
    let sign = usize::from(signed_pos > 0);
    (chan * 2 + sign) * NUM_PIXELS + signed_pos.unsigned_abs() as usize
}

impl BucketManager {
    pub(crate) fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); NUM_CHANNELS * 2 * NUM_PIXELS],
            sigs: Vec::new(),
        }
    }

    /// Number of mirrored signatures (equals the database image count).
    pub(crate) fn len(&self) -> usize {
        self.sigs.len()
    }

    /// Members of the bucket a signed position in `chan` falls into.
    pub(crate) fn members(&self, chan: usize, signed_pos: i16) -> &[InternId] {
        &self.buckets[bucket_index(chan, signed_pos)]
    }

    /// The mirrored signature stored under an internal ID.
    pub(crate) fn signature_of(&self, id: InternId) -> &Signature {
        &self.sigs[id as usize]
    }

    /// Indexes a signature under the next internal ID.
    ///
    /// IDs are append-only: `id` must equal the current mirror length. Zero
    /// entries (possible only in padded signatures that validation rejects
    /// upstream) are skipped, and a duplicate position within one channel
    /// inserts idempotently.
    pub(crate) fn add_signature(&mut self, id: InternId, sig: &Signature) {
        debug_assert_eq!(id as usize, self.sigs.len());

        for (chan, positions) in sig.coefs.iter().enumerate() {
            for &pos in positions {
                if pos == 0 {
                    continue;
                }
                let bucket = &mut self.buckets[bucket_index(chan, pos)];
                // All of one signature's inserts happen back-to-back, so a
                // duplicate position shows up as a repeated tail entry.
                if bucket.last() != Some(&id) {
                    bucket.push(id);
                }
            }
        }
        self.sigs.push(sig.clone());
    }

    /// Removes the signature under `id` and returns it.
    ///
    /// Mirrors `Vec::swap_remove`: the last internal ID is re-keyed to `id`,
    /// both in the mirror and in every bucket it occupies, keeping internal
    /// IDs dense.
    pub(crate) fn swap_remove(&mut self, id: InternId) -> Signature {
        let last = (self.sigs.len() - 1) as InternId;

        // Drop all of id's memberships first so the re-key below can never
        // collide with them.
        let removed = self.sigs[id as usize].clone();
        for (chan, positions) in removed.coefs.iter().enumerate() {
            for &pos in positions {
                if pos == 0 {
                    continue;
                }
                let bucket = &mut self.buckets[bucket_index(chan, pos)];
                if let Some(at) = bucket.iter().position(|&m| m == id) {
                    bucket.swap_remove(at);
                }
            }
        }

        if id != last {
            for (chan, positions) in self.sigs[last as usize].coefs.iter().enumerate() {
                for &pos in positions {
                    if pos == 0 {
                        continue;
                    }
                    let bucket = &mut self.buckets[bucket_index(chan, pos)];
                    if let Some(at) = bucket.iter().position(|&m| m == last) {
                        bucket[at] = id;
                    }
                }
            }
        }
        self.sigs.swap_remove(id as usize);

        removed
    }

    /// Per-bucket population counts, a sizing diagnostic.
    pub(crate) fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }
}
