//! Image database server example.
//!
//! Serves the fixed-size record protocol on the default loopback endpoint,
//! optionally backed by a signature file.
//!
//! Usage:
//!   cargo run --example serve [signature-file]
//!
//! Then drive it with the add_query example.

use haardb::{HaarDbServer, DEFAULT_HOST, DEFAULT_PORT};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init();

    let server = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading signature file {path}...");
            HaarDbServer::with_store(path)?
        }
        None => HaarDbServer::new(),
    };

    println!(
        "Serving {} images on {DEFAULT_HOST}:{DEFAULT_PORT}",
        server.num_images().await
    );

    // Serve forever (until Ctrl+C)
    server.listen_default().await?;

    Ok(())
}
