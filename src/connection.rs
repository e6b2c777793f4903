#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

//! Connection lifecycle.
//!
//! A single task owns the active transport and every piece of mutable connection state.
//! Caller commands, selection results, transport events and the retry timer all arrive
//! through one `select!` and are handled by `ConnectionManager::dispatch`, so phase
//! transitions never happen anywhere else.

use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use futures::FutureExt as _;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

use crate::Result;
use crate::codec::MessageCodec;
use crate::config::BackoffConfig;
use crate::error::Error;
use crate::report::{Category, ErrorReporter, Handler, panic_message};
use crate::subscription::{FilterUpdate, SubscriptionTracker};
use crate::throttle::{LinearBackoff, deadline_after};
use crate::transport::{
    Established, Payload, SelectionFailure, Transport, TransportEvent, TransportKind,
    TransportSelector,
};

/// Lifecycle phase of a client.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// No connection attempted yet
    #[default]
    Idle,
    /// A transport attempt is in flight
    Connecting,
    /// A transport is established and broadcasts are flowing
    Live,
    /// Waiting for the retry delay before the next attempt
    Backoff,
    /// Shut down by the caller; no further attempts are made
    Stopped,
}

impl Phase {
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Snapshot of the connection, published after every change.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub phase: Phase,
    /// Kind of the active transport, if any
    pub transport: Option<TransportKind>,
    /// Delay currently in effect between failed attempts
    pub retry_delay: Duration,
    /// Whether the last transport failed with an error rather than closing cleanly
    pub transport_error: bool,
    /// Raw payload bytes received since the client was created
    pub bytes_received: u64,
}

/// Requests from [`Client`](crate::Client) handles.
pub(crate) enum Command {
    Connect(oneshot::Sender<Result<()>>),
    SetFilters(Vec<String>),
    Disconnect(oneshot::Sender<()>),
}

type Selection = std::result::Result<Established, SelectionFailure>;

enum Input {
    /// `None` once every client handle is gone
    Command(Option<Command>),
    Selection(Selection),
    Transport(TransportEvent),
    RetryElapsed,
}

/// Start a connection task in the [`Phase::Idle`] phase.
pub(crate) fn spawn(
    selector: TransportSelector,
    backoff: &BackoffConfig,
    codec: Arc<dyn MessageCodec>,
    handler: Arc<dyn Handler>,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<ConnectionState>,
) {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::default());

    let manager = ConnectionManager {
        selector: Arc::new(selector),
        codec,
        reporter: ErrorReporter::new(Arc::clone(&handler)),
        handler,
        throttle: backoff.into(),
        subscriptions: SubscriptionTracker::default(),
        transport: None,
        attempt: None,
        retry_at: None,
        phase: Phase::Idle,
        last_error: None,
        bytes_received: 0,
        commands,
        state_tx,
    };
    tokio::spawn(manager.run());

    (commands_tx, state_rx)
}

/// Owns the active transport and drives connect, live, backoff and retry cycles.
struct ConnectionManager {
    selector: Arc<TransportSelector>,
    codec: Arc<dyn MessageCodec>,
    handler: Arc<dyn Handler>,
    reporter: ErrorReporter,
    throttle: LinearBackoff,
    subscriptions: SubscriptionTracker,
    /// At most one transport is active at a time
    transport: Option<Box<dyn Transport>>,
    /// Selection in flight, only while [`Phase::Connecting`]
    attempt: Option<BoxFuture<'static, Selection>>,
    /// Pending retry, only while [`Phase::Backoff`]
    retry_at: Option<Instant>,
    phase: Phase,
    /// Error that ended the last transport, cleared once a new one is established
    last_error: Option<Error>,
    bytes_received: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    async fn run(mut self) {
        loop {
            let input = tokio::select! {
                biased;

                command = self.commands.recv() => Input::Command(command),
                selection = next_selection(&mut self.attempt) => Input::Selection(selection),
                event = next_event(&mut self.transport) => Input::Transport(event),
                () = retry_timer(self.retry_at) => Input::RetryElapsed,
            };

            if self.dispatch(input).await.is_break() {
                break;
            }
        }
    }

    /// The single entry point for every state change.
    async fn dispatch(&mut self, input: Input) -> ControlFlow<()> {
        match input {
            Input::Command(Some(Command::Connect(reply))) => {
                _ = reply.send(self.connect());
            }
            Input::Command(Some(Command::SetFilters(filters))) => {
                if let Some(update) = self.subscriptions.set_filters(filters, self.phase) {
                    self.send_filters(update).await;
                }
            }
            Input::Command(Some(Command::Disconnect(reply))) => {
                self.shutdown().await;
                _ = reply.send(());
                return ControlFlow::Break(());
            }
            Input::Command(None) => {
                self.shutdown().await;
                return ControlFlow::Break(());
            }
            Input::Selection(selection) => {
                self.attempt = None;
                match selection {
                    Ok(established) => self.on_established(established).await,
                    Err(failure) => self.on_connect_failed(&failure),
                }
            }
            Input::Transport(event) => self.on_transport_event(event).await,
            Input::RetryElapsed => {
                self.retry_at = None;
                self.begin_attempt();
            }
        }

        ControlFlow::Continue(())
    }

    fn connect(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle | Phase::Backoff => {
                self.retry_at = None;
                self.begin_attempt();
                Ok(())
            }
            phase => Err(Error::validation(format!("cannot connect while {phase}"))),
        }
    }

    fn begin_attempt(&mut self) {
        let selector = Arc::clone(&self.selector);
        self.attempt = Some(async move { selector.select().await }.boxed());
        self.phase = Phase::Connecting;
        self.publish();
    }

    /// Skipped kinds were already logged by the selector and are not reported to the
    /// handler; they only surface as entries of a [`Category::ConnectionFailed`] event.
    async fn on_established(&mut self, established: Established) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            kind = %established.transport.kind(),
            skipped = established.skipped.len(),
            "Transport established"
        );

        let Established { transport, .. } = established;

        self.throttle.reset();
        self.last_error = None;
        self.transport = Some(transport);
        self.phase = Phase::Live;
        self.publish();

        if let Some(update) = self.subscriptions.replay() {
            self.send_filters(update).await;
        }
    }

    fn on_connect_failed(&mut self, failure: &SelectionFailure) {
        self.throttle.increase();
        let delay = self.throttle.current();
        self.schedule_retry(delay);
        self.reporter
            .report(Category::ConnectionFailed, failure.entries(), Some(delay));
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Payload(payload) => self.on_payload(payload),
            TransportEvent::Error(error) => self.fail_transport(error).await,
            TransportEvent::Closed => {
                self.close_transport().await;
                self.on_closed();
            }
        }
    }

    fn on_payload(&mut self, payload: Payload) {
        let size = u64::try_from(payload.len()).unwrap_or(u64::MAX);
        self.bytes_received = self.bytes_received.saturating_add(size);

        #[cfg(feature = "tracing")]
        tracing::trace!(bytes = size, ?payload, "Payload received");

        self.publish();

        match self.codec.decode(payload) {
            Ok(data) => self.deliver(data),
            Err(e) => {
                // A malformed payload does not end an otherwise healthy transport
                self.reporter
                    .report(Category::DecodeError, vec![e.to_string()], None);
            }
        }
    }

    fn deliver(&self, data: Value) {
        let handler = &self.handler;
        let detail = match catch_unwind(AssertUnwindSafe(|| handler.on_update(data))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!(
                "update handler panicked: {}",
                panic_message(panic.as_ref())
            ),
        };

        self.reporter
            .report(Category::CallbackError, vec![detail], None);
    }

    async fn fail_transport(&mut self, error: Error) {
        self.last_error = Some(error);
        self.close_transport().await;
        self.on_closed();
    }

    /// Schedule the next attempt after a live transport went away.
    ///
    /// Only a close preceded by an error increases the delay. A server that keeps
    /// accepting and then closing cleanly is therefore reconnected to without pause.
    fn on_closed(&mut self) {
        let (category, details) = match &self.last_error {
            Some(error) => {
                self.throttle.increase();
                (Category::TransportError, vec![error.to_string()])
            }
            None => (
                Category::Disconnected,
                vec!["server closed the connection".to_owned()],
            ),
        };

        let delay = self.throttle.current();
        self.schedule_retry(delay);
        self.reporter.report(category, details, Some(delay));
    }

    fn schedule_retry(&mut self, delay: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?delay, "Scheduling reconnection");

        self.retry_at = Some(deadline_after(delay));
        self.phase = Phase::Backoff;
        self.publish();
    }

    async fn send_filters(&mut self, update: FilterUpdate) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        if !transport.supports_outbound() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                kind = %transport.kind(),
                "Transport cannot carry filter updates, skipping"
            );
            return;
        }

        let sent = match serde_json::to_string(&update) {
            Ok(text) => transport.send(text).await,
            Err(e) => Err(e.into()),
        };

        if let Err(error) = sent {
            self.fail_transport(error).await;
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }

    async fn shutdown(&mut self) {
        self.retry_at = None;
        self.attempt = None;
        self.close_transport().await;
        self.phase = Phase::Stopped;
        self.publish();

        #[cfg(feature = "tracing")]
        tracing::info!("Broadcast client stopped");
    }

    fn publish(&self) {
        _ = self.state_tx.send(ConnectionState {
            phase: self.phase,
            transport: self.transport.as_ref().map(|t| t.kind()),
            retry_delay: self.throttle.current(),
            transport_error: self.last_error.is_some(),
            bytes_received: self.bytes_received,
        });
    }
}

async fn next_selection(attempt: &mut Option<BoxFuture<'static, Selection>>) -> Selection {
    match attempt {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn next_event(transport: &mut Option<Box<dyn Transport>>) -> TransportEvent {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
