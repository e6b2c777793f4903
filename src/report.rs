//! Caller-facing callbacks and the error events delivered to them.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// Error returned by a caller's update handler.
pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;

/// Short, human-readable classification of an [`ErrorEvent`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Category {
    /// Invalid configuration; no attempts are made
    #[strum(serialize = "Configuration Error")]
    Configuration,
    /// A single transport kind could not be opened. Logged only; failed kinds reach the
    /// handler as entries of a [`Category::ConnectionFailed`] event
    #[strum(serialize = "Transport Unavailable")]
    TransportUnavailable,
    /// No transport kind in scope could be established
    #[strum(serialize = "Connection Failed")]
    ConnectionFailed,
    /// A live transport failed
    #[strum(serialize = "Transport Error")]
    TransportError,
    /// The server closed a live transport without an error
    #[strum(serialize = "Disconnected")]
    Disconnected,
    /// A payload could not be decoded; the transport stays live
    #[strum(serialize = "Decode Error")]
    DecodeError,
    /// The update handler failed; the transport stays live
    #[strum(serialize = "Callback Error")]
    CallbackError,
}

/// A failure surfaced to the caller.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub category: Category,
    /// Supporting detail, most relevant first
    pub details: Vec<String>,
    /// Delay until the next automatic attempt; `None` when none will be made
    pub retry_delay: Option<Duration>,
}

impl ErrorEvent {
    #[must_use]
    pub fn new(category: Category, details: Vec<String>, retry_delay: Option<Duration>) -> Self {
        Self {
            category,
            details,
            retry_delay,
        }
    }

    /// Every descriptive entry in order, starting with the category.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        std::iter::once(self.category.to_string())
            .chain(self.details.iter().cloned())
            .collect()
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries().join(": "))?;
        if let Some(delay) = self.retry_delay {
            write!(f, " (retrying in {delay:?})")?;
        }
        Ok(())
    }
}

/// Receives decoded broadcasts and error events.
///
/// Both methods run on the connection task. A returned error or a panic in
/// [`Handler::on_update`] is reported as [`Category::CallbackError`] and never stops the
/// connection.
pub trait Handler: Send + Sync + 'static {
    /// A broadcast was received and decoded.
    fn on_update(&self, data: Value) -> Result<(), HandlerError>;

    /// A failure occurred. Ignored by default.
    fn on_error(&self, _event: &ErrorEvent) {}
}

type UpdateFn = Box<dyn Fn(Value) -> Result<(), HandlerError> + Send + Sync>;
type ErrorFn = Box<dyn Fn(&ErrorEvent) + Send + Sync>;

/// A [`Handler`] built from closures.
///
/// # Example
///
/// ```
/// use broadcast_client::report::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .with_update(|data| {
///         println!("update: {data}");
///         Ok(())
///     })
///     .with_error(|event| eprintln!("{event}"));
/// ```
#[derive(Default)]
pub struct Callbacks {
    update: Option<UpdateFn>,
    error: Option<ErrorFn>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_update<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("update", &self.update.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl Handler for Callbacks {
    fn on_update(&self, data: Value) -> Result<(), HandlerError> {
        match &self.update {
            Some(update) => update(data),
            None => Ok(()),
        }
    }

    fn on_error(&self, event: &ErrorEvent) {
        if let Some(error) = &self.error {
            error(event);
        }
    }
}

/// Normalizes failures into [`ErrorEvent`]s, logs them, and forwards them to the handler.
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    handler: Arc<dyn Handler>,
}

impl ErrorReporter {
    pub(crate) fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }

    pub(crate) fn report(
        &self,
        category: Category,
        details: Vec<String>,
        retry_delay: Option<Duration>,
    ) {
        let event = ErrorEvent::new(category, details, retry_delay);

        #[cfg(feature = "tracing")]
        tracing::error!(
            category = %event.category,
            retry_delay = ?event.retry_delay,
            details = ?event.details,
            "Broadcast client error"
        );

        let handler = &self.handler;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler.on_error(&event))) {
            let message = panic_message(panic.as_ref());

            #[cfg(feature = "tracing")]
            tracing::error!(%message, "Error handler panicked");
            #[cfg(not(feature = "tracing"))]
            let _ = &message;
        }
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}

/// Best-effort text of a caught panic.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn entries_start_with_category() {
        let event = ErrorEvent::new(
            Category::ConnectionFailed,
            vec!["websocket: refused".to_owned(), "poll: 502".to_owned()],
            Some(Duration::from_secs(3)),
        );

        assert_eq!(
            event.entries(),
            vec!["Connection Failed", "websocket: refused", "poll: 502"]
        );
        assert_eq!(
            event.to_string(),
            "Connection Failed: websocket: refused: poll: 502 (retrying in 3s)"
        );
    }

    #[test]
    fn callbacks_default_to_no_op() {
        let callbacks = Callbacks::new();

        assert!(callbacks.on_update(Value::Null).is_ok());
        callbacks.on_error(&ErrorEvent::new(Category::Disconnected, Vec::new(), None));
    }

    #[test]
    fn reporter_forwards_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = Callbacks::new().with_error(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        ErrorReporter::new(Arc::new(handler)).report(
            Category::DecodeError,
            vec!["expected value".to_owned()],
            None,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].category, Category::DecodeError);
        assert_eq!(seen[0].retry_delay, None);
    }

    #[test]
    fn panicking_error_handler_is_contained() {
        let handler = Callbacks::new().with_error(|_event| panic!("sink exploded"));

        ErrorReporter::new(Arc::new(handler)).report(Category::Disconnected, Vec::new(), None);
    }

    #[test]
    fn panic_message_extracts_text() {
        let result: std::thread::Result<()> = catch_unwind(|| panic!("boom {}", 42));
        let panic = result.unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "boom 42");

        let result: std::thread::Result<()> = catch_unwind(|| panic!("static"));
        let panic = result.unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "static");
    }
}
