//! One-shot reads and writes of individual values on the broadcast server.
//!
//! Independent of the connection lifecycle: every call is a single request/response.

use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::Result;
use crate::config::Endpoints;

/// Key/value client for the data endpoint.
///
/// # Example
///
/// ```no_run
/// use broadcast_client::{Endpoints, ValuesClient};
/// use serde_json::json;
///
/// # async fn example() -> broadcast_client::Result<()> {
/// let values = ValuesClient::new(&Endpoints::new("https://example.com/data/now")?)?;
///
/// values.set("thermostat/target", &json!(21.5), true).await?;
/// let target = values.get("thermostat/target").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ValuesClient {
    base: Url,
    client: ReqwestClient,
}

impl ValuesClient {
    /// Create a client for the poll locator of `endpoints`.
    pub fn new(endpoints: &Endpoints) -> Result<Self> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("broadcast_client"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            base: endpoints.poll_url(),
            client,
        })
    }

    /// Locator every key is resolved against.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, key: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            key.trim_start_matches('/')
        );
        url.set_path(&path);
        url
    }

    /// Read the value stored under `key`.
    ///
    /// An empty response body reads as [`Value::Null`].
    pub async fn get(&self, key: &str) -> Result<Value> {
        let request = self.client.request(Method::GET, self.url(key)).build()?;

        crate::request(&self.client, request).await
    }

    /// Store `value` under `key`, optionally asking the server to persist it.
    ///
    /// Returns the server's response body.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        persist: bool,
    ) -> Result<Value> {
        let mut request = self.client.request(Method::POST, self.url(key)).json(value);
        if persist {
            request = request.query(&[("persist", "true")]);
        }

        crate::request(&self.client, request.build()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_resolve_below_poll_locator() {
        let values = ValuesClient::new(&Endpoints::new("http://localhost:8080").unwrap()).unwrap();

        assert_eq!(
            values.url("lights/porch").as_str(),
            "http://localhost:8080/data/now.json/lights/porch"
        );
        assert_eq!(
            values.url("/lights").as_str(),
            "http://localhost:8080/data/now.json/lights"
        );
    }
}
