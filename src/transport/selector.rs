use std::fmt;
use std::sync::Arc;

use super::{Transport, TransportDescriptor, TransportKind, TransportRegistry};
use crate::config::ClientConfig;
use crate::error::Error;
#[cfg(feature = "tracing")]
use crate::report::Category;

/// A transport that opened, plus the higher-priority kinds that failed before it.
#[non_exhaustive]
pub struct Established {
    pub transport: Box<dyn Transport>,
    pub skipped: Vec<FailedAttempt>,
}

impl fmt::Debug for Established {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Established")
            .field("kind", &self.transport.kind())
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// One kind that could not be opened.
#[non_exhaustive]
#[derive(Debug)]
pub struct FailedAttempt {
    pub kind: TransportKind,
    pub error: Error,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.error)
    }
}

/// Every kind in scope failed.
#[non_exhaustive]
#[derive(Debug)]
pub struct SelectionFailure {
    /// Forced kind, if the attempt was restricted to one
    pub forced: Option<TransportKind>,
    /// Failures in the order the kinds were tried
    pub attempts: Vec<FailedAttempt>,
}

impl SelectionFailure {
    /// Describe the failure, one entry per attempted kind.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.attempts.iter().map(ToString::to_string).collect();
        if entries.is_empty() {
            entries.push("no transport kinds registered".to_owned());
        }
        entries
    }
}

/// Tries transport kinds in registry order and returns the first that opens.
#[derive(Debug)]
pub struct TransportSelector {
    registry: TransportRegistry,
    config: Arc<ClientConfig>,
}

impl TransportSelector {
    #[must_use]
    pub fn new(registry: TransportRegistry, config: Arc<ClientConfig>) -> Self {
        Self { registry, config }
    }

    /// Descriptors in scope for an attempt: just the forced kind, or all of them.
    fn candidates(&self) -> impl Iterator<Item = &TransportDescriptor> {
        let forced = self.config.transport_override;
        self.registry
            .descriptors()
            .iter()
            .filter(move |d| forced.is_none_or(|kind| kind == d.kind))
    }

    /// Open the highest-priority transport that is available.
    ///
    /// A failing kind does not stop the walk; only when every kind in scope failed is
    /// the attempt reported as failed.
    pub async fn select(&self) -> Result<Established, SelectionFailure> {
        let mut failures = Vec::new();

        for descriptor in self.candidates() {
            let kind = descriptor.kind;

            #[cfg(feature = "tracing")]
            tracing::debug!(%kind, "Opening transport");

            match descriptor.factory.open(&self.config).await {
                Ok(transport) => {
                    return Ok(Established {
                        transport,
                        skipped: failures,
                    });
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        category = %Category::TransportUnavailable,
                        %kind,
                        %error,
                        "Transport unavailable, trying the next kind"
                    );
                    failures.push(FailedAttempt { kind, error });
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::error!(attempted = failures.len(), "All transport kinds failed");

        Err(SelectionFailure {
            forced: self.config.transport_override,
            attempts: failures,
        })
    }
}
