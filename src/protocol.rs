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


//! Wire protocol for the TCP front end.
//!
//! The framing is a plain byte copy of fixed-size records: every request is
//! exactly [`REQUEST_SIZE`] bytes, every response starts with a
//! [`RESPONSE_HEADER_SIZE`]-byte header, and query responses append `count`
//! fixed-size hit records. There are no per-message length prefixes and no
//! message-level versioning; compatibility is governed by the signature file
//! header only. All integers are little-endian.
//!
//! # Message Flow
//!
//! 1. Client sends one request record.
//! 2. Server answers with one response header.
//! 3. For query opcodes, `count` hit records follow the header.

use crate::error::{HaarDbError, Result};
use bytes::{Buf, BufMut, BytesMut};

// Request opcodes

/// Liveness probe; answers OK with the protocol version in `value`.
pub const OP_PING: u8 = 1;

/// Extract a signature from a server-local image file and add it under
/// `user_id` (0 = assign the next free ID; the assigned ID comes back in
/// `value`).
pub const OP_ADD: u8 = 2;

/// Remove the image stored under `user_id`.
pub const OP_REMOVE: u8 = 3;

/// Extract a signature from a server-local image file and return the `k`
/// most similar stored images.
pub const OP_QUERY: u8 = 4;

/// Return the `k` images most similar to the one stored under `user_id`,
/// excluding that image itself.
pub const OP_QUERY_ID: u8 = 5;

/// Report the number of stored images in `value`.
pub const OP_COUNT: u8 = 6;

/// Flush the attached signature file to disk.
pub const OP_SAVE: u8 = 7;

// Response status codes

/// The operation succeeded.
pub const STATUS_OK: u8 = 0;

/// No image with the requested user ID.
pub const STATUS_NOT_FOUND: u8 = 1;

/// The user ID is already present.
pub const STATUS_DUPLICATE: u8 = 2;

/// The database is at capacity.
pub const STATUS_CAPACITY: u8 = 3;

/// The image could not be decoded, or its spectrum is degenerate.
pub const STATUS_DECODE: u8 = 4;

/// The request record was malformed.
pub const STATUS_BAD_REQUEST: u8 = 5;

/// The server hit an I/O or storage failure.
pub const STATUS_IO: u8 = 6;

/// Protocol version reported by PING.
pub const PROTOCOL_VERSION: u64 = 1;

/// Size of every request record in bytes.
pub const REQUEST_SIZE: usize = 272;

/// Size of the response header in bytes.
pub const RESPONSE_HEADER_SIZE: usize = 16;

/// Size of one query hit record in bytes.
pub const HIT_SIZE: usize = 16;

/// Maximum byte length of the path field.
pub const MAX_PATH_LEN: usize = 252;

/// A client request.
///
/// Unused fields are zero: PING ignores everything, REMOVE and QUERY_ID
/// ignore the path, COUNT and SAVE ignore all three parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// One of the `OP_*` opcodes.
    pub opcode: u8,
    /// Result limit for query opcodes.
    pub k: u32,
    /// User ID parameter.
    pub user_id: u64,
    /// Server-local image path for ADD and QUERY.
    pub path: String,
}

impl Request {
    /// A request with all parameters zeroed.
    #[must_use]
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            k: 0,
            user_id: 0,
            path: String::new(),
        }
    }

    /// Serializes the request into its fixed-size wire form.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::Protocol`] if the path exceeds [`MAX_PATH_LEN`] bytes.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let path = self.path.as_bytes();
        if path.len() > MAX_PATH_LEN {
            return Err(HaarDbError::Protocol(format!(
                "path of {} bytes exceeds the {MAX_PATH_LEN}-byte field",
                path.len()
            )));
        }

        buf.put_u8(self.opcode);
        buf.put_bytes(0, 3); // padding
        buf.put_u32_le(self.k);
        buf.put_u64_le(self.user_id);
        buf.put_u16_le(path.len() as u16);
        buf.put_bytes(0, 2); // padding
        buf.put_slice(path);
        buf.put_bytes(0, MAX_PATH_LEN - path.len());
        Ok(())
    }

    /// Reads and deserializes a request from a buffer.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::Protocol`] if fewer than [`REQUEST_SIZE`] bytes are
    /// available, the path length overruns its field, or the path is not
    /// UTF-8.
    pub fn from_bytes(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < REQUEST_SIZE {
            return Err(HaarDbError::Protocol(format!(
                "short request: {} of {REQUEST_SIZE} bytes",
                buf.len()
            )));
        }

        let opcode = buf.get_u8();
        buf.advance(3);
        let k = buf.get_u32_le();
        let user_id = buf.get_u64_le();
        let path_len = buf.get_u16_le() as usize;
        buf.advance(2);

        if path_len > MAX_PATH_LEN {
            return Err(HaarDbError::Protocol(format!(
                "path length {path_len} overruns the {MAX_PATH_LEN}-byte field"
            )));
        }
        let path = std::str::from_utf8(&buf[..path_len])
            .map_err(|_| HaarDbError::Protocol("path is not valid UTF-8".into()))?
            .to_string();
        buf.advance(MAX_PATH_LEN);

        Ok(Self {
            opcode,
            k,
            user_id,
            path,
        })
    }
}

/// The fixed-size header of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// One of the `STATUS_*` codes.
    pub status: u8,
    /// Number of hit records that follow (query opcodes only).
    pub count: u32,
    /// Opcode-specific value: assigned/removed user ID, image count, or the
    /// protocol version for PING.
    pub value: u64,
}

impl ResponseHeader {
    /// A success header with no trailing hits.
    #[must_use]
    pub fn ok(value: u64) -> Self {
        Self {
            status: STATUS_OK,
            count: 0,
            value,
        }
    }

    /// A failure header for an error, using [`status_for`].
    #[must_use]
    pub fn failure(err: &HaarDbError) -> Self {
        Self {
            status: status_for(err),
            count: 0,
            value: 0,
        }
    }

    /// Serializes the header into its fixed-size wire form.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.status);
        buf.put_bytes(0, 3); // padding
        buf.put_u32_le(self.count);
        buf.put_u64_le(self.value);
    }

    /// Reads and deserializes a response header from a buffer.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::Protocol`] if fewer than [`RESPONSE_HEADER_SIZE`]
    /// bytes are available.
    pub fn from_bytes(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(HaarDbError::Protocol(format!(
                "short response header: {} of {RESPONSE_HEADER_SIZE} bytes",
                buf.len()
            )));
        }
        let status = buf.get_u8();
        buf.advance(3);
        let count = buf.get_u32_le();
        let value = buf.get_u64_le();
        Ok(Self {
            status,
            count,
            value,
        })
    }
}

/// One query hit on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// User ID of the matched image.
    pub user_id: u64,
    /// Similarity score; higher is more similar.
    pub score: f64,
}

impl Hit {
    /// Serializes the hit into its fixed-size wire form.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.user_id);
        buf.put_f64_le(self.score);
    }

    /// Reads and deserializes a hit from a buffer.
    ///
    /// # Errors
    ///
    /// [`HaarDbError::Protocol`] if fewer than [`HIT_SIZE`] bytes are
    /// available.
    pub fn from_bytes(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < HIT_SIZE {
            return Err(HaarDbError::Protocol(format!(
                "short hit record: {} of {HIT_SIZE} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            user_id: buf.get_u64_le(),
            score: buf.get_f64_le(),
        })
    }
}

/// Maps an error to the wire status code reported to the client.
#[must_use]
pub fn status_for(err: &HaarDbError) -> u8 {
    match err {
        HaarDbError::IdNotFound(_) => STATUS_NOT_FOUND,
        HaarDbError::AlreadyHaveId(_) => STATUS_DUPLICATE,
        HaarDbError::CapacityExceeded => STATUS_CAPACITY,
        HaarDbError::DegenerateImage(_) | HaarDbError::Decode { .. } => STATUS_DECODE,
        HaarDbError::Protocol(_) => STATUS_BAD_REQUEST,
        HaarDbError::Io(_) | HaarDbError::Corrupt(_) => STATUS_IO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let req = Request {
            opcode: OP_QUERY,
            k: 10,
            user_id: 42,
            path: "/var/lib/images/cat.png".to_string(),
        };

        let mut buf = BytesMut::new();
        req.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), REQUEST_SIZE);

        assert_eq!(Request::from_bytes(&mut buf).unwrap(), req);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_request_empty_path() {
        let req = Request::new(OP_PING);
        let mut buf = BytesMut::new();
        req.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), REQUEST_SIZE);
        assert_eq!(Request::from_bytes(&mut buf).unwrap(), req);
    }

    #[test]
    fn test_request_path_too_long() {
        let mut req = Request::new(OP_ADD);
        req.path = "x".repeat(MAX_PATH_LEN + 1);
        let mut buf = BytesMut::new();
        assert!(matches!(
            req.write_to(&mut buf).unwrap_err(),
            HaarDbError::Protocol(_)
        ));
    }

    #[test]
    fn test_request_rejects_overrun_path_len() {
        let mut buf = BytesMut::new();
        Request::new(OP_ADD).write_to(&mut buf).unwrap();
        // Corrupt the path length field (offset 16).
        buf[16] = 0xff;
        buf[17] = 0xff;
        assert!(matches!(
            Request::from_bytes(&mut buf).unwrap_err(),
            HaarDbError::Protocol(_)
        ));
    }

    #[test]
    fn test_response_header_round_trip() {
        let hdr = ResponseHeader {
            status: STATUS_OK,
            count: 3,
            value: 99,
        };
        let mut buf = BytesMut::new();
        hdr.write_to(&mut buf);
        assert_eq!(buf.len(), RESPONSE_HEADER_SIZE);
        assert_eq!(ResponseHeader::from_bytes(&mut buf).unwrap(), hdr);
    }

    #[test]
    fn test_hit_round_trip() {
        let hit = Hit {
            user_id: 7,
            score: -12.625,
        };
        let mut buf = BytesMut::new();
        hit.write_to(&mut buf);
        assert_eq!(buf.len(), HIT_SIZE);
        assert_eq!(Hit::from_bytes(&mut buf).unwrap(), hit);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&HaarDbError::IdNotFound(1)), STATUS_NOT_FOUND);
        assert_eq!(status_for(&HaarDbError::AlreadyHaveId(1)), STATUS_DUPLICATE);
        assert_eq!(status_for(&HaarDbError::CapacityExceeded), STATUS_CAPACITY);
        assert_eq!(
            status_for(&HaarDbError::Protocol("bad".into())),
            STATUS_BAD_REQUEST
        );
        assert_eq!(
            status_for(&HaarDbError::DegenerateImage("x".into())),
            STATUS_DECODE
        );
    }
}
