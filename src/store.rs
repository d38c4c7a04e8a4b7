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


//! On-disk signature storage.
//!
//! Signatures persist in a flat little-endian file: a fixed header carrying
//! the domain constants the records were built with, followed by back-to-back
//! fixed-size records. There are no variable-length fields, so the file
//! length is always `header + count * RECORD_SIZE`.
//!
//! # File Layout
//!
//! ```text
//! magic "HSDB" | version u32 | w u16 | h u16 | coefs u16 | channels u16 | count u64
//! record 0 | record 1 | ...
//! ```
//!
//! Each 280-byte record is `user_id u64 || 3 x 40 x i16 positions ||
//! 3 x f64 DC || width u16 || height u16 || 4 pad bytes`.
//!
//! Durability is exactly "flush on explicit [`save`](SigFile::save)":
//! appends and removals only touch memory until then.

use crate::error::{HaarDbError, Result};
use crate::signature::{ImageRecord, Resolution, Signature};
use crate::{IMG_H, IMG_W, NUM_CHANNELS, NUM_COEFS};
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"HSDB";
const VERSION: u32 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 24;

/// Fixed record size in bytes, padding included.
pub const RECORD_SIZE: usize = 8 + NUM_CHANNELS * NUM_COEFS * 2 + NUM_CHANNELS * 8 + 4 + 4;

/// A signature file: the persistent mirror of a database's records.
///
/// Semantics match [`crate::MemDb`] minus the query engine; user IDs are
/// unique, removal is swap-with-last over the record vector.
#[derive(Debug)]
pub struct SigFile {
    path: PathBuf,
    records: Vec<ImageRecord>,
    by_user: HashMap<u64, usize>,
    dirty: bool,
    open: bool,
}

impl SigFile {
    /// Opens a signature file, loading every record if the file exists, or
    /// starting empty if it does not.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::Corrupt`] for a damaged or incompatible file,
    /// [`HaarDbError::Io`] for filesystem failures.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match fs::read(&path) {
            Ok(data) => parse_file(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut by_user = HashMap::with_capacity(records.len());
        for (at, rec) in records.iter().enumerate() {
            if by_user.insert(rec.user_id, at).is_some() {
                return Err(HaarDbError::Corrupt(format!(
                    "duplicate user ID {} in {}",
                    rec.user_id,
                    path.display()
                )));
            }
        }

        debug!("opened {} with {} records", path.display(), records.len());
        Ok(Self {
            path,
            records,
            by_user,
            dirty: false,
            open: true,
        })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the file holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True if there are unsaved appends or removals.
    #[must_use]
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Iterates over all records in file order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    /// Looks up a record by user ID.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::IdNotFound`] if absent.
    pub fn get_image(&self, user_id: u64) -> Result<&ImageRecord> {
        self.ensure_open()?;
        self.by_user
            .get(&user_id)
            .map(|&at| &self.records[at])
            .ok_or(HaarDbError::IdNotFound(user_id))
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::AlreadyHaveId`] if the user ID is taken.
    pub fn append_image(&mut self, rec: &ImageRecord) -> Result<()> {
        self.ensure_open()?;
        if self.by_user.contains_key(&rec.user_id) {
            return Err(HaarDbError::AlreadyHaveId(rec.user_id));
        }
        self.by_user.insert(rec.user_id, self.records.len());
        self.records.push(rec.clone());
        self.dirty = true;
        Ok(())
    }

    /// Removes a record by user ID and returns it.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::IdNotFound`] if absent.
    pub fn remove_image(&mut self, user_id: u64) -> Result<ImageRecord> {
        self.ensure_open()?;
        let at = self
            .by_user
            .remove(&user_id)
            .ok_or(HaarDbError::IdNotFound(user_id))?;

        let rec = self.records.swap_remove(at);
        if at < self.records.len() {
            self.by_user.insert(self.records[at].user_id, at);
        }
        self.dirty = true;
        Ok(rec)
    }

    /// Writes all records back to disk and clears the dirty flag.
    ///
    /// The whole file is rewritten; partial appends are never left behind.
    pub fn save(&mut self) -> Result<()> {
        self.ensure_open()?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.records.len() * RECORD_SIZE);
        buf.put_slice(&MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u16_le(IMG_W as u16);
        buf.put_u16_le(IMG_H as u16);
        buf.put_u16_le(NUM_COEFS as u16);
        buf.put_u16_le(NUM_CHANNELS as u16);
        buf.put_u64_le(self.records.len() as u64);
        for rec in &self.records {
            put_record(&mut buf, rec);
        }

        fs::write(&self.path, &buf)?;
        self.dirty = false;
        debug!("saved {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    /// Marks the file closed; further operations fail until reopened.
    ///
    /// Unsaved changes are NOT flushed.
    pub fn close(&mut self) {
        if self.dirty {
            warn!("closing {} with unsaved changes", self.path.display());
        }
        self.open = false;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "signature file is closed").into())
        }
    }
}

/// Validates the header and decodes every record.
fn parse_file(data: &[u8]) -> Result<Vec<ImageRecord>> {
    let mut buf = data;
    if buf.remaining() < HEADER_SIZE {
        return Err(HaarDbError::Corrupt("file shorter than header".into()));
    }

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(HaarDbError::Corrupt("bad magic".into()));
    }
    let version = buf.get_u32_le();
    if version != VERSION {
        return Err(HaarDbError::Corrupt(format!("unsupported version {version}")));
    }

    let (w, h) = (buf.get_u16_le(), buf.get_u16_le());
    let (coefs, channels) = (buf.get_u16_le(), buf.get_u16_le());
    if (w as usize, h as usize, coefs as usize, channels as usize)
        != (IMG_W, IMG_H, NUM_COEFS, NUM_CHANNELS)
    {
        return Err(HaarDbError::Corrupt(format!(
            "domain constants mismatch: {w}x{h}, {coefs} coefs, {channels} channels"
        )));
    }

    let count = buf.get_u64_le() as usize;
    if buf.remaining() != count * RECORD_SIZE {
        return Err(HaarDbError::Corrupt(format!(
            "expected {} record bytes, found {}",
            count * RECORD_SIZE,
            buf.remaining()
        )));
    }

    Ok((0..count).map(|_| get_record(&mut buf)).collect())
}

/// Serializes one fixed-size record.
fn put_record(buf: &mut BytesMut, rec: &ImageRecord) {
    buf.put_u64_le(rec.user_id);
    for chan in &rec.sig.coefs {
        for &pos in chan {
            buf.put_i16_le(pos);
        }
    }
    for &dc in &rec.dc {
        buf.put_f64_le(dc);
    }
    buf.put_u16_le(rec.res.width);
    buf.put_u16_le(rec.res.height);
    buf.put_bytes(0, 4); // padding
}

/// Deserializes one fixed-size record; the caller has checked the length.
fn get_record(buf: &mut impl Buf) -> ImageRecord {
    let user_id = buf.get_u64_le();

    let mut coefs = [[0i16; NUM_COEFS]; NUM_CHANNELS];
    for chan in &mut coefs {
        for slot in chan.iter_mut() {
            *slot = buf.get_i16_le();
        }
    }

    let mut dc = [0.0f64; NUM_CHANNELS];
    for d in &mut dc {
        *d = buf.get_f64_le();
    }

    let res = Resolution {
        width: buf.get_u16_le(),
        height: buf.get_u16_le(),
    };
    buf.advance(4); // padding

    ImageRecord {
        user_id,
        sig: Signature { coefs },
        dc,
        res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sig(base: i16) -> Signature {
        let mut coefs = [[0i16; NUM_COEFS]; NUM_CHANNELS];
        for (c, chan) in coefs.iter_mut().enumerate() {
            for (k, slot) in chan.iter_mut().enumerate() {
                let pos = base + (c * NUM_COEFS + k) as i16;
                *slot = if k % 2 == 0 { pos } else { -pos };
            }
        }
        Signature { coefs }
    }

    fn record(user_id: u64, base: i16) -> ImageRecord {
        ImageRecord {
            user_id,
            sig: test_sig(base),
            dc: [base as f64 * 1.5, -0.25, 42.0],
            res: Resolution {
                width: 1920,
                height: 1080,
            },
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("haardb_store_{}_{}.db", name, std::process::id()))
    }

    #[test]
    fn test_record_codec_round_trip() {
        let rec = record(77, 1000);
        let mut buf = BytesMut::new();
        put_record(&mut buf, &rec);
        assert_eq!(buf.len(), RECORD_SIZE);

        let mut slice = &buf[..];
        assert_eq!(get_record(&mut slice), rec);
        assert!(!slice.has_remaining());
    }

    #[test]
    fn test_save_and_reopen() {
        let path = temp_path("reopen");
        std::fs::remove_file(&path).ok();

        let mut file = SigFile::open(&path).unwrap();
        assert!(file.is_empty());
        assert!(!file.dirty());

        file.append_image(&record(1, 1)).unwrap();
        file.append_image(&record(2, 300)).unwrap();
        assert!(file.dirty());
        file.save().unwrap();
        assert!(!file.dirty());

        let reloaded = SigFile::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get_image(1).unwrap(), &record(1, 1));
        assert_eq!(reloaded.get_image(2).unwrap(), &record(2, 300));
        assert_eq!(reloaded.iter().count(), 2);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_duplicate_append() {
        let path = temp_path("dup");
        std::fs::remove_file(&path).ok();

        let mut file = SigFile::open(&path).unwrap();
        file.append_image(&record(5, 1)).unwrap();
        let err = file.append_image(&record(5, 300)).unwrap_err();
        assert!(matches!(err, HaarDbError::AlreadyHaveId(5)));
        assert_eq!(file.len(), 1);
    }

    #[test]
    fn test_remove_then_save() {
        let path = temp_path("remove");
        std::fs::remove_file(&path).ok();

        let mut file = SigFile::open(&path).unwrap();
        for (uid, base) in [(1u64, 1i16), (2, 300), (3, 600)] {
            file.append_image(&record(uid, base)).unwrap();
        }
        let removed = file.remove_image(1).unwrap();
        assert_eq!(removed, record(1, 1));
        assert!(matches!(
            file.remove_image(1).unwrap_err(),
            HaarDbError::IdNotFound(1)
        ));
        file.save().unwrap();

        let reloaded = SigFile::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get_image(1).is_err());
        assert!(reloaded.get_image(2).is_ok());
        assert!(reloaded.get_image(3).is_ok());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corrupt_files_rejected() {
        let path = temp_path("corrupt");

        std::fs::write(&path, b"definitely not a signature file").unwrap();
        assert!(matches!(
            SigFile::open(&path).unwrap_err(),
            HaarDbError::Corrupt(_)
        ));

        // Valid header, truncated record region.
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(VERSION);
        buf.put_u16_le(IMG_W as u16);
        buf.put_u16_le(IMG_H as u16);
        buf.put_u16_le(NUM_COEFS as u16);
        buf.put_u16_le(NUM_CHANNELS as u16);
        buf.put_u64_le(3);
        buf.put_bytes(0, RECORD_SIZE); // only one record's worth of bytes
        std::fs::write(&path, &buf).unwrap();
        assert!(matches!(
            SigFile::open(&path).unwrap_err(),
            HaarDbError::Corrupt(_)
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_closed_file_rejects_operations() {
        let path = temp_path("closed");
        std::fs::remove_file(&path).ok();

        let mut file = SigFile::open(&path).unwrap();
        file.append_image(&record(1, 1)).unwrap();
        file.close();
        assert!(!file.is_open());

        assert!(file.get_image(1).is_err());
        assert!(file.append_image(&record(2, 300)).is_err());
        assert!(file.save().is_err());
    }
}
