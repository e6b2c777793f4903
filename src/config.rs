#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::transport::{TransportKind, TransportRegistry};

const DEFAULT_BACKOFF_INCREMENT_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_CAP_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL_DURATION: Duration = Duration::from_secs(20);

/// Path used when the base locator does not name one.
const DEFAULT_DATA_PATH: &str = "/data/now";
const DATA_SUFFIX: &str = ".json";
const COMPRESSED_SUFFIX: &str = ".gz";

/// Configuration for a broadcast [`Client`](crate::Client).
///
/// Immutable once the client is constructed.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Where each transport kind connects
    pub endpoints: Endpoints,
    /// Retry throttling between failed attempts
    #[builder(default)]
    pub backoff: BackoffConfig,
    /// Time between two requests of the poll transport
    #[builder(default = DEFAULT_POLL_INTERVAL_DURATION)]
    pub poll_interval: Duration,
    /// Restrict connection attempts to a single transport kind
    pub transport_override: Option<TransportKind>,
    /// Request compressed payloads on transports that support it
    #[builder(default = true)]
    pub compression: bool,
}

impl ClientConfig {
    /// Force a transport kind by name, e.g. `"websocket"` or `"poll"`.
    ///
    /// Unknown names are rejected with a [`Kind::Configuration`](crate::error::Kind) error.
    /// No client exists yet at that point, so this error is only returned and never reaches
    /// a [`Handler`](crate::Handler). A known kind missing from the registry is caught later
    /// by [`Client::with_transports`](crate::Client::with_transports), which also reports it
    /// to the handler as [`Category::Configuration`](crate::Category::Configuration).
    pub fn with_transport_override(mut self, name: &str) -> Result<Self> {
        self.transport_override = Some(name.parse()?);
        Ok(self)
    }

    /// Check the configuration against the transports that can actually be built.
    pub(crate) fn validate(mut self, registry: &TransportRegistry) -> Result<Self> {
        if self.poll_interval.is_zero() {
            return Err(Error::configuration("poll interval must be greater than zero"));
        }

        if let Some(kind) = self.transport_override
            && !registry.contains(kind)
        {
            return Err(Error::configuration(format!(
                "transport kind `{kind}` is not registered"
            )));
        }

        if self.compression && !cfg!(feature = "compression") {
            #[cfg(feature = "tracing")]
            tracing::error!("compression support not compiled in, disabling compression");
            self.compression = false;
        }

        Ok(self)
    }
}

/// Linear retry throttling configuration.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Added to the retry delay after every failure
    pub increment: Duration,
    /// Longest delay ever waited between attempts
    pub cap: Duration,
}

impl BackoffConfig {
    #[must_use]
    pub const fn new(increment: Duration, cap: Duration) -> Self {
        Self { increment, cap }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            increment: DEFAULT_BACKOFF_INCREMENT_DURATION,
            cap: DEFAULT_BACKOFF_CAP_DURATION,
        }
    }
}

/// Server locators for every transport kind.
///
/// A single `http`/`https` base locator is enough: the poll and WebSocket locators are
/// derived from it unless set explicitly.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    websocket: Option<Url>,
    poll: Option<Url>,
}

impl Endpoints {
    /// Create endpoints from a base `http` or `https` locator.
    ///
    /// A base without a path gets the default data path `/data/now`.
    pub fn new(base: &str) -> Result<Self> {
        let mut base = Url::parse(base)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "base locator must use http or https, got `{}`",
                base.scheme()
            )));
        }

        if base.path().trim_end_matches('/').is_empty() {
            base.set_path(DEFAULT_DATA_PATH);
        }

        Ok(Self {
            base,
            websocket: None,
            poll: None,
        })
    }

    /// Use an explicit WebSocket locator instead of deriving one.
    pub fn with_websocket(mut self, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::configuration(format!(
                "websocket locator must use ws or wss, got `{}`",
                url.scheme()
            )));
        }
        self.websocket = Some(url);
        Ok(self)
    }

    /// Use an explicit poll locator instead of deriving one.
    pub fn with_poll(mut self, url: &str) -> Result<Self> {
        self.poll = Some(Url::parse(url)?);
        Ok(self)
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Locator requested by the poll transport and the values client.
    #[must_use]
    pub fn poll_url(&self) -> Url {
        self.poll
            .clone()
            .unwrap_or_else(|| with_suffix(&self.base, DATA_SUFFIX))
    }

    /// Locator for the WebSocket transports.
    ///
    /// Derived locators end in `.json`, plus `.gz` when `compressed`. An explicit
    /// locator is returned verbatim.
    pub fn websocket_url(&self, compressed: bool) -> Result<Url> {
        if let Some(url) = &self.websocket {
            return Ok(url.clone());
        }

        let suffix = if compressed {
            format!("{DATA_SUFFIX}{COMPRESSED_SUFFIX}")
        } else {
            DATA_SUFFIX.to_owned()
        };
        let mut url = with_suffix(&self.base, &suffix);
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme).map_err(|()| {
            Error::configuration(format!("cannot derive a {scheme} locator from {}", self.base))
        })?;

        Ok(url)
    }
}

fn with_suffix(url: &Url, suffix: &str) -> Url {
    let mut url = url.clone();
    let path = format!("{}{suffix}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}
