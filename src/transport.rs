//! HTTP transport.
//!
//! [`crate::XalClient`] talks to the network only through [`HttpTransport`],
//! which allows swapping in another client (or a scripted one in tests).

use std::time::Duration;

use async_trait::async_trait;
use log::trace;

use crate::{error::Error, extensions::ResponseUrl};

/// Default timeout for a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends a fully assembled HTTP request and returns the complete response
///
/// Implementations must not retry. Non-success statuses are returned as
/// regular responses, the caller decides how to treat them.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request`
    async fn send(&self, request: http::Request<Vec<u8>>)
        -> Result<http::Response<Vec<u8>>, Error>;
}

/// [`HttpTransport`] backed by [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create transport with [`DEFAULT_TIMEOUT`]
    pub fn new() -> Result<Self, Error> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create transport with a custom per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Wrap an existing client, its own timeout settings apply
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, Error> {
        let request = reqwest::Request::try_from(request)?;
        trace!("Sending {} {}", request.method(), request.url());

        let resp = self.client.execute(request).await?;

        let url = resp.url().clone();
        let mut builder = http::Response::builder().status(resp.status());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(resp.headers().clone());
        }
        let body = resp.bytes().await?.to_vec();

        let mut response = builder.body(body)?;
        response.extensions_mut().insert(ResponseUrl(url));
        Ok(response)
    }
}
