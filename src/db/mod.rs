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


//! The in-memory image database.
//!
//! [`MemDb`] is the authoritative store. Every image lives under two
//! identifiers: the caller's stable *user ID*, and a dense *internal ID*
//! that indexes the image array and the inverted-index buckets. Internal IDs
//! stay contiguous across removals via swap-with-last: the last image is
//! relocated into the vacated slot and its signature is re-keyed in the
//! index. Internal IDs never leave this module.
//!
//! `MemDb` does no locking of its own. The intended concurrency model is a
//! single reader-writer lock over the whole database (the TCP front end in
//! [`crate::server`] wraps it in `tokio::sync::RwLock`): mutations take the
//! writer side, lookups and queries share the reader side.

mod bucket;
pub mod query;

use crate::error::{HaarDbError, Result};
use crate::signature::{DcTriple, ImageRecord, Resolution};
use bucket::BucketManager;
use log::debug;
use query::{Match, QueryParams};
use std::collections::HashMap;

/// Dense index into the image array; private to the database.
pub(crate) type InternId = u32;

/// Per-image metadata held in the image array.
///
/// The signature itself lives in the inverted index's mirror, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    /// Externally meaningful image identifier.
    pub user_id: u64,
    /// DC value per YIQ channel.
    pub dc: DcTriple,
    /// Original image resolution.
    pub res: Resolution,
}

/// Monotonic user-ID generator.
///
/// Hands out IDs strictly greater than every ID it has ever observed, so
/// auto-assigned IDs never collide with caller-supplied ones.
#[derive(Debug)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    /// A fresh generator; the first assigned ID is 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Notes an externally supplied ID so later [`next`](Self::next) calls
    /// skip past it.
    pub fn saw(&mut self, id: u64) {
        self.next = self.next.max(id.saturating_add(1));
    }

    /// Returns the next free ID and advances the counter.
    pub fn next(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.saturating_add(1);
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The in-memory image database: dense image array, user-ID map, and the
/// inverted coefficient index, maintained as one consistent unit.
pub struct MemDb {
    images: Vec<StoredImage>,
    by_user: HashMap<u64, InternId>,
    buckets: BucketManager,
    ids: IdGenerator,
    max_images: usize,
}

impl MemDb {
    /// An empty database bounded only by the internal ID width.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_images(InternId::MAX as usize)
    }

    /// An empty database that refuses to grow past `max_images`.
    #[must_use]
    pub fn with_max_images(max_images: usize) -> Self {
        Self {
            images: Vec::new(),
            by_user: HashMap::new(),
            buckets: BucketManager::new(),
            ids: IdGenerator::new(),
            max_images: max_images.min(InternId::MAX as usize),
        }
    }

    /// Number of images currently stored.
    #[must_use]
    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// True if the database holds no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Looks up an image by user ID; `None` if absent.
    #[must_use]
    pub fn has(&self, user_id: u64) -> Option<&StoredImage> {
        self.by_user
            .get(&user_id)
            .map(|&id| &self.images[id as usize])
    }

    /// Looks up an image by user ID.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::IdNotFound`] if the ID is absent.
    pub fn get_image(&self, user_id: u64) -> Result<&StoredImage> {
        self.has(user_id).ok_or(HaarDbError::IdNotFound(user_id))
    }

    /// The next free auto-assigned user ID.
    pub fn next_id(&mut self) -> u64 {
        self.ids.next()
    }

    /// Iterates over all stored user IDs in internal order.
    pub fn user_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.images.iter().map(|img| img.user_id)
    }

    /// Adds a signed image record and indexes its signature.
    ///
    /// Returns the record's user ID. On any error the database is left in
    /// its pre-call state, generator included.
    ///
    /// # Errors
    ///
    /// - [`HaarDbError::AlreadyHaveId`] if the user ID is taken.
    /// - [`HaarDbError::CapacityExceeded`] if the database is full.
    pub fn add_image(&mut self, rec: &ImageRecord) -> Result<u64> {
        if self.by_user.contains_key(&rec.user_id) {
            return Err(HaarDbError::AlreadyHaveId(rec.user_id));
        }
        if self.images.len() >= self.max_images {
            return Err(HaarDbError::CapacityExceeded);
        }

        self.ids.saw(rec.user_id);

        let id = self.images.len() as InternId;
        self.images.push(StoredImage {
            user_id: rec.user_id,
            dc: rec.dc,
            res: rec.res,
        });
        self.by_user.insert(rec.user_id, id);
        self.buckets.add_signature(id, &rec.sig);

        debug!("added image {} as intern {id}", rec.user_id);
        Ok(rec.user_id)
    }

    /// Removes an image and returns its full record, signature included.
    ///
    /// Internal IDs stay dense: the last image is relocated into the vacated
    /// slot and re-keyed in the inverted index.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::IdNotFound`] if the ID is absent.
    pub fn remove_image(&mut self, user_id: u64) -> Result<ImageRecord> {
        let id = self
            .by_user
            .remove(&user_id)
            .ok_or(HaarDbError::IdNotFound(user_id))?;

        let sig = self.buckets.swap_remove(id);
        let img = self.images.swap_remove(id as usize);
        if (id as usize) < self.images.len() {
            // The former last image now lives at `id`.
            let moved = self.images[id as usize].user_id;
            self.by_user.insert(moved, id);
            debug!("relocated image {moved} to intern {id}");
        }

        debug!("removed image {user_id}");
        Ok(ImageRecord {
            user_id,
            sig,
            dc: img.dc,
            res: img.res,
        })
    }

    /// Runs a k-nearest query against the index.
    ///
    /// An empty result is a normal outcome, never an error.
    #[must_use]
    pub fn query(&self, params: &QueryParams) -> Vec<Match> {
        query::execute(params, &self.images, &self.buckets)
    }

    /// Queries for the `k` images most similar to an already-stored image,
    /// excluding the image itself.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::IdNotFound`] if the ID is absent.
    pub fn query_by_id(&self, user_id: u64, k: usize) -> Result<Vec<Match>> {
        let &id = self
            .by_user
            .get(&user_id)
            .ok_or(HaarDbError::IdNotFound(user_id))?;

        let img = &self.images[id as usize];
        let mut params = QueryParams::new(self.buckets.signature_of(id).clone(), img.dc, k);
        params.exclude.insert(user_id);
        Ok(query::execute(&params, &self.images, &self.buckets))
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}
