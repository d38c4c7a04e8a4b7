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


//! TCP front end for the image database.
//!
//! The server wraps one [`MemDb`] (optionally mirrored by a [`SigFile`])
//! behind a single reader-writer lock and speaks the fixed-size record
//! protocol of [`crate::protocol`]. Each accepted connection gets its own
//! task; lookups and queries share the read side of the lock, mutations take
//! the write side, so one writer never races the readers.
//!
//! Signature extraction for ADD and QUERY runs before the lock is taken:
//! decoding a file never blocks other clients' queries.

use crate::db::query::QueryParams;
use crate::db::MemDb;
use crate::error::{HaarDbError, Result};
use crate::protocol::{
    Hit, Request, ResponseHeader, OP_ADD, OP_COUNT, OP_PING, OP_QUERY, OP_QUERY_ID, OP_REMOVE,
    OP_SAVE, PROTOCOL_VERSION, REQUEST_SIZE,
};
use crate::signature::ImageRecord;
use crate::store::SigFile;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use bytes::BytesMut;
use log::{error, info, warn};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

/// Database state shared by all connection tasks.
struct Shared {
    db: MemDb,
    store: Option<SigFile>,
}

/// The image database server.
///
/// Cloning is cheap and shares the underlying database, so a handle can be
/// kept for inspection while another drives [`listen`](Self::listen).
#[derive(Clone)]
pub struct HaarDbServer {
    shared: Arc<RwLock<Shared>>,
}

impl HaarDbServer {
    /// A server over a fresh in-memory database with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RwLock::new(Shared {
                db: MemDb::new(),
                store: None,
            })),
        }
    }

    /// A server backed by a signature file.
    ///
    /// Every record already in the file is loaded into the in-memory
    /// database before the server accepts work; later adds and removals are
    /// mirrored to the file and flushed on the SAVE opcode.
    ///
    /// # Errors
    ///
    /// Propagates [`SigFile::open`] failures and any inconsistency while
    /// rehydrating.
    pub fn with_store<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = SigFile::open(path)?;

        let mut db = MemDb::new();
        for rec in store.iter() {
            db.add_image(rec)?;
        }
        info!("rehydrated {} images from signature file", db.num_images());

        Ok(Self {
            shared: Arc::new(RwLock::new(Shared {
                db,
                store: Some(store),
            })),
        })
    }

    /// Number of images currently stored.
    pub async fn num_images(&self) -> usize {
        self.shared.read().await.db.num_images()
    }

    /// Binds the default loopback endpoint (`127.0.0.1:9548`) and serves
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns the bind or accept error that stopped the server.
    pub async fn listen_default(&self) -> Result<()> {
        self.listen(DEFAULT_HOST, DEFAULT_PORT).await
    }

    /// Binds `host:port` and serves forever.
    ///
    /// # Errors
    ///
    /// Returns the bind or accept error that stopped the server.
    pub async fn listen(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("listening on {host}:{port}");
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    ///
    /// Useful when the caller needs the ephemeral port before serving.
    ///
    /// # Errors
    ///
    /// Returns the accept error that stopped the server.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("client connected from {peer}");

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(shared, stream).await {
                    error!("client {peer}: {e}");
                }
                info!("client {peer} disconnected");
            });
        }
    }
}

impl Default for HaarDbServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads fixed-size requests off one connection until it closes.
async fn handle_connection(shared: Arc<RwLock<Shared>>, mut stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;

    let mut raw = [0u8; REQUEST_SIZE];
    loop {
        match stream.read_exact(&mut raw).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut buf = BytesMut::from(&raw[..]);
        let reply = match Request::from_bytes(&mut buf) {
            Ok(req) => dispatch(&shared, req).await,
            // Framing is fixed-size, so a malformed record does not desync
            // the stream; report it and keep reading.
            Err(e) => render(ResponseHeader::failure(&e), &[]),
        };
        stream.write_all(&reply).await?;
    }
}

/// Executes one request against the shared database.
async fn dispatch(shared: &Arc<RwLock<Shared>>, req: Request) -> BytesMut {
    match req.opcode {
        OP_PING => render(ResponseHeader::ok(PROTOCOL_VERSION), &[]),

        OP_COUNT => {
            let guard = shared.read().await;
            render(ResponseHeader::ok(guard.db.num_images() as u64), &[])
        }

        OP_ADD => match ImageRecord::extract(&req.path) {
            Ok(mut rec) => {
                let mut guard = shared.write().await;
                rec.user_id = if req.user_id == 0 {
                    guard.db.next_id()
                } else {
                    req.user_id
                };
                match guard.db.add_image(&rec) {
                    Ok(uid) => {
                        if let Some(store) = guard.store.as_mut() {
                            if let Err(e) = store.append_image(&rec) {
                                warn!("image {uid} not mirrored to store: {e}");
                            }
                        }
                        render(ResponseHeader::ok(uid), &[])
                    }
                    Err(e) => render(ResponseHeader::failure(&e), &[]),
                }
            }
            Err(e) => render(ResponseHeader::failure(&e), &[]),
        },

        OP_REMOVE => {
            let mut guard = shared.write().await;
            match guard.db.remove_image(req.user_id) {
                Ok(rec) => {
                    if let Some(store) = guard.store.as_mut() {
                        if let Err(e) = store.remove_image(rec.user_id) {
                            warn!("image {} not removed from store: {e}", rec.user_id);
                        }
                    }
                    render(ResponseHeader::ok(rec.user_id), &[])
                }
                Err(e) => render(ResponseHeader::failure(&e), &[]),
            }
        }

        OP_QUERY => match ImageRecord::extract(&req.path) {
            Ok(probe) => {
                let guard = shared.read().await;
                let hits = guard
                    .db
                    .query(&QueryParams::new(probe.sig, probe.dc, req.k as usize));
                render_hits(&hits)
            }
            Err(e) => render(ResponseHeader::failure(&e), &[]),
        },

        OP_QUERY_ID => {
            let guard = shared.read().await;
            match guard.db.query_by_id(req.user_id, req.k as usize) {
                Ok(hits) => render_hits(&hits),
                Err(e) => render(ResponseHeader::failure(&e), &[]),
            }
        }

        OP_SAVE => {
            let mut guard = shared.write().await;
            match guard.store.as_mut() {
                Some(store) => match store.save() {
                    Ok(()) => render(ResponseHeader::ok(store.len() as u64), &[]),
                    Err(e) => render(ResponseHeader::failure(&e), &[]),
                },
                // No store attached: flushing nothing succeeds vacuously.
                None => render(ResponseHeader::ok(0), &[]),
            }
        }

        other => render(
            ResponseHeader::failure(&HaarDbError::Protocol(format!("unknown opcode {other}"))),
            &[],
        ),
    }
}

/// Serializes a response header plus its trailing hit records.
fn render(mut header: ResponseHeader, hits: &[Hit]) -> BytesMut {
    header.count = hits.len() as u32;
    let mut buf = BytesMut::new();
    header.write_to(&mut buf);
    for hit in hits {
        hit.write_to(&mut buf);
    }
    buf
}

/// Renders a successful query result.
fn render_hits(matches: &[crate::db::query::Match]) -> BytesMut {
    let hits: Vec<Hit> = matches
        .iter()
        .map(|m| Hit {
            user_id: m.user_id,
            score: m.score,
        })
        .collect();
    render(ResponseHeader::ok(0), &hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RESPONSE_HEADER_SIZE, STATUS_NOT_FOUND, STATUS_OK};
    use tokio_test::assert_ok;

    fn textured_image(path: &std::path::Path) {
        image::RgbImage::from_fn(64, 64, |x, y| {
            let v = x.wrapping_mul(41).wrapping_add(y.wrapping_mul(23));
            image::Rgb([(v % 251) as u8, (v % 239) as u8, (v % 233) as u8])
        })
        .save(path)
        .unwrap();
    }

    async fn roundtrip(stream: &mut TcpStream, req: &Request) -> (ResponseHeader, Vec<Hit>) {
        let mut buf = BytesMut::new();
        req.write_to(&mut buf).unwrap();
        stream.write_all(&buf).await.unwrap();

        let mut raw = vec![0u8; RESPONSE_HEADER_SIZE];
        stream.read_exact(&mut raw).await.unwrap();
        let mut buf = BytesMut::from(&raw[..]);
        let header = ResponseHeader::from_bytes(&mut buf).unwrap();

        let mut hits = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            let mut raw = vec![0u8; crate::protocol::HIT_SIZE];
            stream.read_exact(&mut raw).await.unwrap();
            let mut buf = BytesMut::from(&raw[..]);
            hits.push(Hit::from_bytes(&mut buf).unwrap());
        }
        (header, hits)
    }

    #[tokio::test]
    async fn test_add_query_remove_over_socket() {
        let img_path = std::env::temp_dir().join(format!(
            "haardb_server_img_{}.bmp",
            std::process::id()
        ));
        textured_image(&img_path);

        let server = HaarDbServer::new();
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });

        let mut stream = assert_ok!(TcpStream::connect(addr).await);

        // PING
        let (header, _) = roundtrip(&mut stream, &Request::new(OP_PING)).await;
        assert_eq!(header.status, STATUS_OK);
        assert_eq!(header.value, PROTOCOL_VERSION);

        // ADD with auto-assigned ID
        let mut add = Request::new(OP_ADD);
        add.path = img_path.to_string_lossy().into_owned();
        let (header, _) = roundtrip(&mut stream, &add).await;
        assert_eq!(header.status, STATUS_OK);
        let uid = header.value;
        assert!(uid >= 1);
        assert_eq!(server.num_images().await, 1);

        // QUERY the same file: the stored image is a perfect match.
        let mut query = Request::new(OP_QUERY);
        query.path.clone_from(&add.path);
        query.k = 5;
        let (header, hits) = roundtrip(&mut stream, &query).await;
        assert_eq!(header.status, STATUS_OK);
        assert_eq!(header.count, 1);
        assert_eq!(hits[0].user_id, uid);
        assert!(hits[0].score > 0.0);

        // REMOVE, then the same ID is gone.
        let mut remove = Request::new(OP_REMOVE);
        remove.user_id = uid;
        let (header, _) = roundtrip(&mut stream, &remove).await;
        assert_eq!(header.status, STATUS_OK);
        let (header, _) = roundtrip(&mut stream, &remove).await;
        assert_eq!(header.status, STATUS_NOT_FOUND);

        // COUNT is back to zero.
        let (header, _) = roundtrip(&mut stream, &Request::new(OP_COUNT)).await;
        assert_eq!(header.status, STATUS_OK);
        assert_eq!(header.value, 0);

        task.abort();
        std::fs::remove_file(&img_path).ok();
    }

    #[tokio::test]
    async fn test_rehydrates_from_store() {
        let img_path = std::env::temp_dir().join(format!(
            "haardb_server_rehydrate_img_{}.bmp",
            std::process::id()
        ));
        let db_path = std::env::temp_dir().join(format!(
            "haardb_server_rehydrate_{}.db",
            std::process::id()
        ));
        std::fs::remove_file(&db_path).ok();
        textured_image(&img_path);

        let mut store = SigFile::open(&db_path).unwrap();
        let mut rec = ImageRecord::extract(&img_path).unwrap();
        rec.user_id = 9;
        store.append_image(&rec).unwrap();
        store.save().unwrap();

        let server = HaarDbServer::with_store(&db_path).unwrap();
        assert_eq!(server.num_images().await, 1);
        // The generator skipped past the rehydrated ID.
        let mut guard = server.shared.write().await;
        assert!(guard.db.next_id() > 9);
        drop(guard);

        std::fs::remove_file(&img_path).ok();
        std::fs::remove_file(&db_path).ok();
    }
}
