//! Provides the HTTP client side of the peer protocol.
//!
//! A [HttpGetter] asks a single remote peer for the value of a key by sending
//! `POST <peer><base path>` with a JSON body like `{"group": "scores", "key": "Tom"}`. A
//! successful response carries the raw value as body, all other status codes are treated as
//! failure.
use std::time::Duration;

use anyhow::Context;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Method, StatusCode};
use hyper_tls::HttpsConnector;

use crate::peers::{PeerGetter, Request, Response};

/// Describes the client type shared by all getters of a pool.
pub type HttpClient = Client<HttpsConnector<HttpConnector>>;

/// Creates a client which can talk to both, plain HTTP and HTTPS peers.
pub fn new_client() -> HttpClient {
    Client::builder().build::<_, Body>(HttpsConnector::new())
}

/// Fetches values from a remote peer via HTTP.
pub struct HttpGetter {
    address: String,
    url: String,
    client: HttpClient,
    timeout: Duration,
}

impl HttpGetter {
    /// Creates a getter for the peer reachable at **address** (e.g. "http://10.0.0.2:8001").
    ///
    /// The **base_path** is the path on which the peer serves the protocol and **timeout** limits
    /// the duration of a whole request.
    pub fn new(address: &str, base_path: &str, client: HttpClient, timeout: Duration) -> Self {
        HttpGetter {
            address: address.to_owned(),
            url: format!("{}{}", address.trim_end_matches('/'), base_path),
            client,
            timeout,
        }
    }

    /// Returns the URL which is used to contact the peer.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, request: &Request) -> anyhow::Result<Response> {
        let body = serde_json::to_vec(request).context("Failed to encode peer request")?;
        let mut http_request = hyper::Request::new(Body::from(body));
        *http_request.method_mut() = Method::POST;
        *http_request.uri_mut() = self
            .url
            .parse()
            .with_context(|| format!("Invalid peer URL {}", &self.url))?;
        let _ = http_request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .request(http_request)
            .await
            .context("Failed to contact peer")?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read peer response")?;

        if status != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "Peer responded with {}: {}",
                status,
                String::from_utf8_lossy(&body)
            ));
        }

        Ok(Response {
            value: body.to_vec(),
        })
    }
}

#[async_trait::async_trait]
impl PeerGetter for HttpGetter {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get(&self, request: &Request) -> anyhow::Result<Response> {
        match tokio::time::timeout(self.timeout, self.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Request for {}/{} timed out after {}",
                request.group,
                request.key,
                crate::fmt::format_duration(self.timeout)
            )),
        }
    }
}
