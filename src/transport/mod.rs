//! Transport kinds and the registry used to construct them.
//!
//! # Architecture
//!
//! - [`Transport`]: an established, exclusively owned channel to the server
//! - [`TransportFactory`]: constructs one kind of transport, failing fast when unavailable
//! - [`TransportRegistry`]: ordered capability registry, highest priority first
//! - [`TransportSelector`]: walks the registry and returns the first transport that opens

pub mod error;
pub mod poll;
pub mod selector;
#[cfg(feature = "websocket")]
pub mod websocket;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::TransportError;
pub use selector::{Established, FailedAttempt, SelectionFailure, TransportSelector};

use crate::Result;
use crate::config::ClientConfig;
use crate::error::Error;

/// Supported transport kinds, in fallback priority order.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum TransportKind {
    /// Full-duplex WebSocket on the (optionally compressed) data locator
    #[strum(serialize = "websocket")]
    WebSocket,
    /// Full-duplex WebSocket on the uncompressed locator, for servers without compression
    #[strum(serialize = "websocket-legacy")]
    WebSocketLegacy,
    /// Periodic HTTP requests against the poll locator
    #[strum(serialize = "poll")]
    Poll,
}

impl TransportKind {
    /// Every kind, highest priority first.
    pub const ALL: [TransportKind; 3] = [Self::WebSocket, Self::WebSocketLegacy, Self::Poll];
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::configuration(format!("transport kind `{name}` does not exist")))
    }
}

/// A raw message received on a live transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary {
        data: Vec<u8>,
        /// Whether the sender compressed the data
        compressed: bool,
    },
}

impl Payload {
    /// Size of the payload as received, in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary { data, .. } => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Events a live transport reports to its owner.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// A message arrived
    Payload(Payload),
    /// The transport failed; it is unusable afterwards
    Error(Error),
    /// The server closed the transport without an error
    Closed,
}

/// An established transport.
///
/// Owned exclusively by the connection manager, which pulls events from it and
/// requests all outbound traffic.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Whether [`Transport::send`] can deliver messages to the server.
    fn supports_outbound(&self) -> bool {
        true
    }

    /// Send a text message to the server.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Wait for the next event.
    ///
    /// Must be cancel-safe: the manager drops this future whenever another input
    /// arrives first and calls it again later.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the transport. No events are read afterwards.
    async fn close(&mut self);
}

/// Constructs one transport kind.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    /// Open a transport, or fail fast if this kind cannot be established right now.
    async fn open(&self, config: &ClientConfig) -> Result<Box<dyn Transport>>;
}

/// A transport kind paired with the factory that builds it.
#[non_exhaustive]
#[derive(Clone)]
pub struct TransportDescriptor {
    pub kind: TransportKind,
    pub factory: Arc<dyn TransportFactory>,
}

impl fmt::Debug for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportDescriptor")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered list of transport descriptors, highest priority first.
#[derive(Clone, Debug)]
pub struct TransportRegistry {
    descriptors: Vec<TransportDescriptor>,
}

impl TransportRegistry {
    /// A registry without any transports.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Register a factory for `kind`.
    ///
    /// Replaces an existing factory for the same kind in place, keeping its priority.
    /// New kinds are appended with the lowest priority.
    #[must_use]
    pub fn register<F: TransportFactory>(mut self, kind: TransportKind, factory: F) -> Self {
        let descriptor = TransportDescriptor {
            kind,
            factory: Arc::new(factory),
        };

        match self.descriptors.iter_mut().find(|d| d.kind == kind) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
        self
    }

    #[must_use]
    pub fn contains(&self, kind: TransportKind) -> bool {
        self.descriptors.iter().any(|d| d.kind == kind)
    }

    #[must_use]
    pub fn descriptors(&self) -> &[TransportDescriptor] {
        &self.descriptors
    }
}

impl Default for TransportRegistry {
    /// All built-in kinds. Kinds whose cargo feature is disabled stay registered but
    /// report themselves unavailable.
    fn default() -> Self {
        let registry = Self::empty();

        #[cfg(feature = "websocket")]
        let registry = registry
            .register(TransportKind::WebSocket, websocket::WebSocketFactory)
            .register(TransportKind::WebSocketLegacy, websocket::LegacyWebSocketFactory);
        #[cfg(not(feature = "websocket"))]
        let registry = registry
            .register(
                TransportKind::WebSocket,
                Unavailable::new(TransportKind::WebSocket, "built without the `websocket` feature"),
            )
            .register(
                TransportKind::WebSocketLegacy,
                Unavailable::new(
                    TransportKind::WebSocketLegacy,
                    "built without the `websocket` feature",
                ),
            );

        registry.register(TransportKind::Poll, poll::PollFactory)
    }
}

/// Factory for a kind that exists but cannot be built in this runtime.
#[cfg(not(feature = "websocket"))]
struct Unavailable {
    kind: TransportKind,
    reason: &'static str,
}

#[cfg(not(feature = "websocket"))]
impl Unavailable {
    const fn new(kind: TransportKind, reason: &'static str) -> Self {
        Self { kind, reason }
    }
}

#[cfg(not(feature = "websocket"))]
#[async_trait]
impl TransportFactory for Unavailable {
    async fn open(&self, _config: &ClientConfig) -> Result<Box<dyn Transport>> {
        Err(TransportError::Unavailable {
            kind: self.kind,
            reason: self.reason.to_owned(),
        }
        .into())
    }
}
