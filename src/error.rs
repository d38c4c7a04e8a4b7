//! Error types for the image database library.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for image database operations.
pub type Result<T> = std::result::Result<T, HaarDbError>;

/// Errors that can occur in image database operations.
#[derive(Debug, Error)]
pub enum HaarDbError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Lookup or removal of a user ID that is not in the database.
    #[error("no image with user ID {0}")]
    IdNotFound(u64),

    /// Attempt to add an image under a user ID that is already present.
    #[error("user ID {0} is already in the database")]
    AlreadyHaveId(u64),

    /// Adding another image would overflow the internal ID space.
    #[error("image capacity exceeded")]
    CapacityExceeded,

    /// Signature extraction produced an empty coefficient slot, which only
    /// happens for flat images with no usable detail.
    #[error("degenerate image (flat spectrum): {}", .0.display())]
    DegenerateImage(PathBuf),

    /// The upstream image decoder failed to load or parse the file.
    #[error("cannot decode {}: {source}", .path.display())]
    Decode {
        /// Path of the image that failed to decode.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Malformed wire request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The signature file on disk is damaged or was written by an
    /// incompatible build.
    #[error("corrupt signature file: {0}")]
    Corrupt(String),
}
