#![expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

use super::TransportKind;
use crate::error::{Error, Kind};

/// Transport error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "websocket")]
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Error making a poll request
    Http(reqwest::Error),
    /// Poll request answered with a non-success status
    Status(StatusCode),
    /// The kind exists but cannot be constructed in this runtime
    Unavailable {
        kind: TransportKind,
        reason: String,
    },
    /// Transport was not established within the allowed time
    Timeout(Duration),
    /// Transport was already closed
    ConnectionClosed,
    /// Transport cannot carry client-to-server messages
    OutboundUnsupported(TransportKind),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "websocket")]
            Self::WebSocket(e) => write!(f, "WebSocket error: {e}"),
            Self::Http(e) => write!(f, "poll request failed: {e}"),
            Self::Status(status) => write!(f, "poll request returned {status}"),
            Self::Unavailable { kind, reason } => write!(f, "{kind} unavailable: {reason}"),
            Self::Timeout(after) => write!(f, "transport not established within {after:?}"),
            Self::ConnectionClosed => write!(f, "transport closed"),
            Self::OutboundUnsupported(kind) => write!(f, "{kind} cannot send messages"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "websocket")]
            Self::WebSocket(e) => Some(e),
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        let kind = match e {
            TransportError::Unavailable { .. } => Kind::Unavailable,
            _ => Kind::Transport,
        };
        Error::with_source(kind, e)
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::Transport, TransportError::WebSocket(e))
    }
}
