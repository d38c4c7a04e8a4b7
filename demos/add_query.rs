//! Client example: add an image, then query for its nearest neighbors.
//!
//! Usage:
//!   cargo run --example add_query -- <server-local-image-path> [k]
//!
//! The path is interpreted by the server, so run this against a server on
//! the same machine (the default endpoint is loopback anyway).

use bytes::BytesMut;
use haardb::protocol::{
    Hit, Request, ResponseHeader, HIT_SIZE, OP_ADD, OP_QUERY, RESPONSE_HEADER_SIZE, STATUS_OK,
};
use haardb::{DEFAULT_HOST, DEFAULT_PORT};
use std::error::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn send(stream: &mut TcpStream, req: &Request) -> Result<(ResponseHeader, Vec<Hit>), Box<dyn Error>> {
    let mut buf = BytesMut::new();
    req.write_to(&mut buf)?;
    stream.write_all(&buf).await?;

    let mut raw = vec![0u8; RESPONSE_HEADER_SIZE];
    stream.read_exact(&mut raw).await?;
    let header = ResponseHeader::from_bytes(&mut BytesMut::from(&raw[..]))?;

    let mut hits = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let mut raw = vec![0u8; HIT_SIZE];
        stream.read_exact(&mut raw).await?;
        hits.push(Hit::from_bytes(&mut BytesMut::from(&raw[..]))?);
    }
    Ok((header, hits))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: add_query <image-path> [k]")?;
    let k: u32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);

    let mut stream = TcpStream::connect((DEFAULT_HOST, DEFAULT_PORT)).await?;

    let mut add = Request::new(OP_ADD);
    add.path.clone_from(&path);
    let (header, _) = send(&mut stream, &add).await?;
    if header.status != STATUS_OK {
        return Err(format!("add failed with status {}", header.status).into());
    }
    println!("Added {path} as user ID {}", header.value);

    let mut query = Request::new(OP_QUERY);
    query.path = path;
    query.k = k;
    let (header, hits) = send(&mut stream, &query).await?;
    if header.status != STATUS_OK {
        return Err(format!("query failed with status {}", header.status).into());
    }

    println!("{} hit(s):", hits.len());
    for hit in hits {
        println!("  {:>8}  score {:.3}", hit.user_id, hit.score);
    }

    Ok(())
}
