//! Request/poll fallback transport.
//!
//! Each successful poll yields one payload; the next request is sent one poll interval
//! after the previous response. Requests carry `Cache-Control: no-cache` plus the
//! validators of the last response, so an unchanged document costs a `304` and produces
//! no payload.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt as _;
use futures::future::BoxFuture;
use reqwest::header::{
    ACCEPT, CACHE_CONTROL, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, USER_AGENT,
};
use reqwest::{Client as ReqwestClient, StatusCode};
use tokio::time::{Instant, sleep_until};
use url::Url;

use super::{Payload, Transport, TransportError, TransportEvent, TransportFactory, TransportKind};
use crate::Result;
use crate::config::ClientConfig;
use crate::throttle::deadline_after;

/// Upper bound for a single poll request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds [`PollTransport`]s.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct PollFactory;

#[async_trait]
impl TransportFactory for PollFactory {
    async fn open(&self, config: &ClientConfig) -> Result<Box<dyn Transport>> {
        let transport = PollTransport::open(config.endpoints.poll_url(), config.poll_interval).await?;
        Ok(Box::new(transport))
    }
}

/// Cache validators from the last `200` response.
#[derive(Debug, Clone, Default)]
struct Validators {
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

impl Validators {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            etag: headers.get(ETAG).cloned(),
            last_modified: headers.get(LAST_MODIFIED).cloned(),
        }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        if let Some(etag) = &self.etag {
            headers.insert(IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = &self.last_modified {
            headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
        }
    }
}

enum PollResponse {
    Body { text: String, validators: Validators },
    NotModified,
}

/// A poll "connection": live for as long as requests keep succeeding.
pub struct PollTransport {
    client: ReqwestClient,
    url: Url,
    interval: Duration,
    validators: Validators,
    /// Body of the opening request, handed out by the first `next_event`
    pending: Option<Payload>,
    /// Request that survives a dropped `next_event` future
    in_flight: Option<BoxFuture<'static, Result<PollResponse>>>,
    next_poll_at: Instant,
}

impl PollTransport {
    /// Perform the first request right away, failing fast if the server does not answer.
    async fn open(url: Url, interval: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static("broadcast_client"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let client = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let mut transport = Self {
            client,
            url,
            interval,
            validators: Validators::default(),
            pending: None,
            in_flight: None,
            next_poll_at: Instant::now(),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %transport.url, "Opening poll transport");

        let first = transport.request().await;
        transport.next_poll_at = deadline_after(transport.interval);
        transport.pending = transport.accept(first?);

        Ok(transport)
    }

    fn request(&self) -> BoxFuture<'static, Result<PollResponse>> {
        let mut headers = HeaderMap::new();
        self.validators.apply(&mut headers);
        let request = self.client.get(self.url.clone()).headers(headers);

        async move {
            let response = request.send().await.map_err(TransportError::Http)?;
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                return Ok(PollResponse::NotModified);
            }
            if !status.is_success() {
                return Err(TransportError::Status(status).into());
            }

            let validators = Validators::from_headers(response.headers());
            let text = response.text().await.map_err(TransportError::Http)?;
            Ok(PollResponse::Body { text, validators })
        }
        .boxed()
    }

    /// Record the validators of a fresh body and turn it into a payload.
    fn accept(&mut self, response: PollResponse) -> Option<Payload> {
        match response {
            PollResponse::Body { text, validators } => {
                self.validators = validators;
                Some(Payload::Text(text))
            }
            PollResponse::NotModified => {
                #[cfg(feature = "tracing")]
                tracing::trace!(url = %self.url, "Poll not modified");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn supports_outbound(&self) -> bool {
        false
    }

    async fn send(&mut self, _text: String) -> Result<()> {
        Err(TransportError::OutboundUnsupported(TransportKind::Poll).into())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(payload) = self.pending.take() {
            return TransportEvent::Payload(payload);
        }

        loop {
            if self.in_flight.is_none() {
                sleep_until(self.next_poll_at).await;
                self.in_flight = Some(self.request());
            }

            let Some(in_flight) = self.in_flight.as_mut() else {
                continue;
            };
            let response = in_flight.await;
            self.in_flight = None;
            self.next_poll_at = deadline_after(self.interval);

            match response {
                Ok(response) => {
                    if let Some(payload) = self.accept(response) {
                        return TransportEvent::Payload(payload);
                    }
                }
                Err(e) => return TransportEvent::Error(e),
            }
        }
    }

    async fn close(&mut self) {
        self.in_flight = None;
        self.pending = None;
    }
}
