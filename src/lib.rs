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


//! # haardb
//!
//! A content-based image similarity database.
//!
//! Every image is reduced to a compact perceptual signature: the image is
//! rescaled to 128x128, converted to the YIQ color space, each channel is run
//! through a 2D Haar wavelet decomposition, and the 40 largest-magnitude AC
//! coefficient positions per channel (signed by coefficient sign) are kept
//! together with the three DC terms. Signatures live in an inverted index
//! keyed by `(channel, sign, position)`, which makes a k-nearest-neighbor
//! query visit a fixed number of buckets regardless of database size.
//!
//! ## Features
//!
//! - **Signature pipeline**: decode -> YIQ -> Haar -> top-N coefficients
//! - **In-memory database**: dense internal IDs with swap-with-last removal
//! - **Inverted index**: per-bucket intern ID lists plus a signature mirror
//!   for O(1) removal
//! - **Weighted-overlap queries**: DC-seeded scoring with a shared weight
//!   table, deterministic top-k
//! - **Persistence**: fixed-size signature records in a flat file, flushed
//!   on explicit save
//! - **Async I/O**: Tokio TCP front end with fixed-size wire records
//!
//! ## Quick Start
//!
//! ```no_run
//! use haardb::{ImageRecord, MemDb, QueryParams};
//!
//! fn main() -> haardb::Result<()> {
//!     let mut db = MemDb::new();
//!
//!     let mut rec = ImageRecord::extract("cat.png")?;
//!     rec.user_id = db.next_id();
//!     db.add_image(&rec)?;
//!
//!     let probe = ImageRecord::extract("query.png")?;
//!     for hit in db.query(&QueryParams::new(probe.sig, probe.dc, 10)) {
//!         println!("{}: {:.2}", hit.user_id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      HaarDbServer (TCP, port 9548)      │
//! │                                         │
//! │  • fixed-size request/response records  │
//! │  • one task per connection              │
//! └──────────────────┬──────────────────────┘
//!                    │ RwLock (1 writer / N readers)
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │                 MemDb                   │
//! │                                         │
//! │  images: Vec<StoredImage>   (intern ID) │
//! │  by_user: UserId -> intern ID           │
//! │  BucketManager: inverted index + mirror │
//! └───────┬─────────────────────────┬───────┘
//!         │                         │
//!         ▼                         ▼
//! ┌───────────────┐        ┌────────────────┐
//! │   signature   │        │    SigFile     │
//! │ decode + Haar │        │ flat records,  │
//! │ + selection   │        │ save on demand │
//! └───────────────┘        └────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod decode;
pub mod signature;
pub mod db;
pub mod store;
pub mod protocol;
pub mod server;

// Re-exports
pub use error::{HaarDbError, Result};
pub use decode::DecodedImage;
pub use signature::{DcTriple, ImageRecord, Resolution, Signature};
pub use db::{IdGenerator, MemDb, StoredImage};
pub use db::query::{Match, QueryParams};
pub use store::SigFile;
pub use server::HaarDbServer;

/// Width every image is rescaled to before signature extraction.
pub const IMG_W: usize = 128;

/// Height every image is rescaled to before signature extraction.
pub const IMG_H: usize = 128;

/// Number of color channels in a signature (Y, I, Q).
pub const NUM_CHANNELS: usize = 3;

/// Number of AC coefficient positions kept per channel.
pub const NUM_COEFS: usize = 40;

/// Positions per transformed channel (`IMG_W * IMG_H`).
pub const NUM_PIXELS: usize = IMG_W * IMG_H;

/// Default listen host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9548;
