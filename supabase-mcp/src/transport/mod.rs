//! Transports.
//!
//! Each transport owns exactly one adapter from what it receives to
//! [`CallMetadata`](crate::metadata::CallMetadata): stdio has no headers and
//! relies on in-band credentials, HTTP converts its request headers.

pub mod http;
pub mod stdio;

pub use http::{create_router, serve_http};
pub use stdio::{serve_lines, serve_stdio};

use thiserror::Error;

/// How the server talks to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// JSON-RPC and plain tool endpoints over HTTP.
    Http,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading or writing the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
