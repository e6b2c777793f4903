use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::Result;
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::ClientConfig;
use crate::connection::{self, Command, ConnectionState};
use crate::error::Error;
use crate::report::{Category, ErrorReporter, Handler};
use crate::transport::{TransportRegistry, TransportSelector};

/// Handle to a broadcast connection.
///
/// The connection itself lives on a background task that owns the active transport.
/// Handles are cheap to clone; the task shuts down after [`Client::disconnect`] or once
/// every handle is dropped.
///
/// # Example
///
/// ```no_run
/// use broadcast_client::{Callbacks, Client, ClientConfig, Endpoints};
///
/// # async fn example() -> broadcast_client::Result<()> {
/// let config = ClientConfig::builder()
///     .endpoints(Endpoints::new("https://example.com/data/now")?)
///     .build();
/// let handler = Callbacks::new()
///     .with_update(|data| {
///         println!("{data}");
///         Ok(())
///     })
///     .with_error(|event| eprintln!("{event}"));
///
/// let client = Client::start(config, handler).await?;
/// client.set_filters(["sensors/attic"])?;
/// # client.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Create an idle client with the built-in transports and the JSON codec.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new<H: Handler>(config: ClientConfig, handler: H) -> Result<Self> {
        Self::with_transports(config, handler, TransportRegistry::default(), JsonCodec)
    }

    /// Create an idle client with custom transports and codec.
    ///
    /// The configuration is validated against `registry` first. An invalid configuration
    /// is reported to `handler` once as [`Category::Configuration`] and returned as an
    /// error; no transport is ever attempted.
    pub fn with_transports<H, C>(
        config: ClientConfig,
        handler: H,
        registry: TransportRegistry,
        codec: C,
    ) -> Result<Self>
    where
        H: Handler,
        C: MessageCodec,
    {
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let config = match config.validate(&registry) {
            Ok(config) => config,
            Err(e) => {
                ErrorReporter::new(handler).report(
                    Category::Configuration,
                    vec![e.to_string()],
                    None,
                );
                return Err(e);
            }
        };

        let backoff = config.backoff.clone();
        let selector = TransportSelector::new(registry, Arc::new(config));
        let (commands, state) = connection::spawn(selector, &backoff, Arc::new(codec), handler);

        Ok(Self { commands, state })
    }

    /// Create a client and start connecting right away.
    pub async fn start<H: Handler>(config: ClientConfig, handler: H) -> Result<Self> {
        let client = Self::new(config, handler)?;
        client.connect().await?;
        Ok(client)
    }

    /// Start connecting.
    ///
    /// Only valid while idle or waiting to retry; a client that is already connecting,
    /// live, or stopped rejects the call.
    pub async fn connect(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect(reply))
            .map_err(|_e| stopped())?;
        response.await.map_err(|_e| stopped())?
    }

    /// Replace the subscription filters.
    ///
    /// Sent right away when live, and replayed after every reconnection.
    pub fn set_filters<I, S>(&self, filters: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters = filters.into_iter().map(Into::into).collect();
        self.commands
            .send(Command::SetFilters(filters))
            .map_err(|_e| stopped())
    }

    /// Stop the client.
    ///
    /// Cancels any pending retry and closes the active transport. No callbacks run
    /// after this returns. Calling it again has no effect.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect(reply)).is_ok() {
            _ = done.await;
        }
    }

    /// Current connection snapshot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Raw payload bytes received since the client was created.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.state.borrow().bytes_received
    }
}

fn stopped() -> Error {
    Error::validation("client is stopped")
}
