//! Error types for the stream adapter.

use thiserror::Error;

/// Ways a connection can end other than a close the consumer asked for.
///
/// The terminal error is delivered on both the availability stream and the
/// message stream, so the type is cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The connection handle could not be constructed.
    #[error("failed to open connection: {0}")]
    Connect(String),

    /// The transport reported an error event.
    #[error("{0}")]
    Transport(String),

    /// The peer closed with the normal closure code without being asked to.
    #[error("Normal closure")]
    NormalClosure,

    /// The peer or the network closed the connection.
    #[error("{}", close_message(.code, .reason))]
    Closed { code: u16, reason: String },

    /// The send capability was exercised a second time.
    #[error("send capability already used for this connection")]
    AlreadyBound,

    /// The handle can no longer carry messages.
    #[error("connection is not open")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;

fn close_message(code: &u16, reason: &str) -> String {
    if reason.is_empty() {
        format!("connection closed with code {}", code)
    } else {
        reason.to_string()
    }
}
