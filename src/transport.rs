//! Transport layer for control clients
//!
//! Clients talk newline-delimited JSON over TCP: they send control messages
//! and receive a status line per controller telemetry update.
//!
//! The transport layer is organized into:
//! - `codec`: NDJSON encoding/decoding for messages
//! - `connection`: a split TCP stream with line-oriented read/write helpers

use thiserror::Error;

mod codec;
mod connection;

pub use codec::{decode_control_message, encode_status};
pub use connection::Connection;

/// Default address of the control server
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5309";

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport connection error: {0}")]
    Connection(String),
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
