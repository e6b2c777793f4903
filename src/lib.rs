#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod report;
pub mod subscription;
pub mod throttle;
pub mod transport;
pub mod values;

use reqwest::Request;
use serde::de::DeserializeOwned;

pub use client::Client;
pub use codec::{JsonCodec, MessageCodec};
pub use config::{BackoffConfig, ClientConfig, Endpoints};
pub use connection::{ConnectionState, Phase};
pub use report::{Callbacks, Category, ErrorEvent, Handler, HandlerError};
pub use transport::{TransportKind, TransportRegistry};
pub use values::ValuesClient;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "Value request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let body = response.text().await?;
    if body.trim().is_empty() {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, path = %path, "Empty response body");

        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }

    Ok(serde_json::from_str(&body)?)
}
