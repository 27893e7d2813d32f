//! Contains the HTTP server used to serve peers and API clients.
//!
//! A server binds to the address given in its config section (e.g. **server.host** and
//! **server.port**) and passes each incoming request to its [Handler]. A node usually runs two
//! servers: one for the peer protocol (handled by the [HttpPool](crate::pool::HttpPool)) and
//! one for external callers (handled by the [ApiHandler](crate::api::ApiHandler)).
//!
//! If the address cannot be bound, the server retries every 500ms. This permits to start a new
//! node while the old one is still shutting down, so that the port is handed over with minimal
//! downtime. The server also listens for config changes and moves to the new address if
//! required.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use peercache::builder::Builder;
//! # use peercache::server::{text_response, Handler, HttpServer};
//! # use hyper::{Body, Request, Response, StatusCode};
//! struct Hello;
//!
//! #[async_trait::async_trait]
//! impl Handler for Hello {
//!     async fn handle(&self, _request: Request<Body>) -> Response<Body> {
//!         text_response(StatusCode::OK, "Hello")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!     HttpServer::new(&platform, "api", 9999, Arc::new(Hello)).event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};

use crate::config::{ChangeNotifier, Config};
use crate::platform::Platform;
use crate::spawn;

/// Specifies the interval in which we retry to bind the server address.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the interval in which a failure to bind is logged.
const BIND_ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Processes the requests received by a [HttpServer].
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Computes the response for the given request.
    ///
    /// Errors have to be reported as appropriate responses, as there is nobody else to handle
    /// them.
    async fn handle(&self, request: Request<Body>) -> Response<Body>;
}

/// Creates a response with the given status, content type and body.
pub fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Body>,
) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

    response
}

/// Creates a plain text response.
pub fn text_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    respond(status, "text/plain; charset=utf-8", message.into())
}

/// Runs a HTTP server on a config driven address.
pub struct HttpServer {
    platform: Arc<Platform>,
    section: String,
    default_port: u16,
    handler: Arc<dyn Handler>,
    bound: AtomicBool,
    current_address: Mutex<Option<String>>,
}

impl HttpServer {
    /// Creates a new server which reads its address from the given config section.
    ///
    /// The server listens on **<section>.host** (0.0.0.0 by default) and **<section>.port**
    /// (**default_port** if absent or invalid). Note that this will not start the server, which
    /// is done by [event_loop](HttpServer::event_loop).
    pub fn new(
        platform: &Arc<Platform>,
        section: &str,
        default_port: u16,
        handler: Arc<dyn Handler>,
    ) -> Arc<Self> {
        Arc::new(HttpServer {
            platform: platform.clone(),
            section: section.to_owned(),
            default_port,
            handler,
            bound: AtomicBool::new(false),
            current_address: Mutex::new(None),
        })
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        let (host, port) = match self.platform.find::<Config>() {
            Some(config) => {
                let handle = config.current();
                (
                    handle
                        .query(format!("{}.host", self.section))
                        .as_str()
                        .unwrap_or("0.0.0.0")
                        .to_owned(),
                    handle
                        .query(format!("{}.port", self.section))
                        .as_i64()
                        .filter(|port| *port > 0 && *port <= u16::MAX as i64)
                        .map(|port| port as u16)
                        .unwrap_or(self.default_port),
                )
            }
            None => ("0.0.0.0".to_owned(), self.default_port),
        };

        format!("{}:{}", host, port)
    }

    /// Returns the address the server is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines if the server is currently bound to its address.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Starts the event loop in a separate task.
    pub fn fork(server: &Arc<HttpServer>) {
        let server = server.clone();
        spawn!(async move {
            server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server is bound.
    pub async fn fork_and_await(server: &Arc<HttpServer>) {
        HttpServer::fork(server);

        while !server.is_bound() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Binds the configured address and serves incoming requests until the platform is
    /// terminated.
    ///
    /// If the address changes, the server is shut down gracefully and restarted on the new
    /// address.
    pub async fn event_loop(&self) {
        let mut last_bind_error_reported: Option<Instant> = None;

        while self.platform.is_running() {
            let address = self.address();

            match bind(&address).await {
                Ok(builder) => {
                    log::info!("Opened {} server on {}...", &self.section, &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    self.bound.store(true, Ordering::Release);

                    if let Err(error) = self.serve(builder, &address).await {
                        log::error!("The {} server failed: {:#}", &self.section, error);
                    }

                    self.bound.store(false, Ordering::Release);
                    *self.current_address.lock().unwrap() = None;
                    log::info!("Closed {} server on {}.", &self.section, &address);
                }
                Err(error) => {
                    // Retries happen every 500ms, so we only log every once in a while...
                    if last_bind_error_reported
                        .map(|reported| reported.elapsed() > BIND_ERROR_REPORT_INTERVAL)
                        .unwrap_or(true)
                    {
                        log::error!(
                            "Cannot open {} server on {}: {:#}. Retrying every 500ms...",
                            &self.section,
                            &address,
                            error
                        );
                        last_bind_error_reported = Some(Instant::now());
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn serve(
        &self,
        builder: hyper::server::Builder<AddrIncoming>,
        address: &str,
    ) -> anyhow::Result<()> {
        let handler = self.handler.clone();
        let make_service = make_service_fn(move |_connection| {
            let handler = handler.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle(request).await) }
                }))
            }
        });

        builder
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown(address))
            .await
            .context("Failed to serve incoming connections")
    }

    /// Completes once the platform is terminated or the configured address no longer matches
    /// the given one.
    async fn await_shutdown(&self, address: &str) {
        let mut notifier = self.platform.find::<Config>().map(|config| config.notifier());

        loop {
            tokio::select! {
                _ = self.platform.terminated() => return,
                changed = config_changed(&mut notifier) => {
                    if changed && self.address() != address {
                        log::info!(
                            "The address of the {} server has changed. Restarting...",
                            &self.section
                        );
                        return;
                    }
                }
            }
        }
    }
}

async fn bind(address: &str) -> anyhow::Result<hyper::server::Builder<AddrIncoming>> {
    let socket_address: SocketAddr = tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("Cannot resolve {}", address))?
        .next()
        .with_context(|| format!("{} didn't resolve to any address", address))?;

    hyper::Server::try_bind(&socket_address).context("Failed to bind server socket")
}

/// Waits for the next config change.
///
/// Returns **false** if the config is gone, in which case no further changes will be reported.
async fn config_changed(notifier: &mut Option<ChangeNotifier>) -> bool {
    match notifier {
        Some(receiver) => match receiver.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                *notifier = None;
                false
            }
            _ => true,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::platform::Platform;
    use crate::server::{text_response, Handler, HttpServer};
    use hyper::{Body, Client, Request, Response, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: Request<Body>) -> Response<Body> {
            text_response(StatusCode::OK, format!("echo {}", request.uri().path()))
        }
    }

    async fn fetch(url: &str) -> String {
        let response = Client::new().get(url.parse().unwrap()).await.unwrap();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn servers_move_to_a_changed_address() {
        // We need exclusive access to the test ports...
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();

        crate::testing::test_async(async {
            let platform = Platform::new();
            let config = Arc::new(Config::new("test.yml"));
            config
                .load_from_string("test:\n  host: 127.0.0.1\n  port: 1503", None)
                .unwrap();
            platform.register::<Config>(config.clone());

            let server = HttpServer::new(&platform, "test", 1, Arc::new(Echo));
            HttpServer::fork_and_await(&server).await;
            assert_eq!(
                server.current_address(),
                Some("127.0.0.1:1503".to_owned())
            );
            assert_eq!(fetch("http://127.0.0.1:1503/hello").await, "echo /hello");

            config
                .load_from_string("test:\n  host: 127.0.0.1\n  port: 1504", None)
                .unwrap();

            // Wait until the server has re-opened on the new port...
            let mut attempts = 0;
            while server.current_address() != Some("127.0.0.1:1504".to_owned()) {
                attempts += 1;
                assert_eq!(attempts < 50, true);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            assert_eq!(fetch("http://127.0.0.1:1504/moved").await, "echo /moved");

            platform.terminate();
        });
    }
}
