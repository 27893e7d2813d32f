//! Provides the HTTP based peer pool.
//!
//! The pool knows all peers of the cluster (including the local node) and places them on a
//! [HashRing]. It implements [PeerPicker], so that a [Group](crate::group::Group) can determine
//! which peer owns a key. It also implements [Handler] and thereby serves the peer protocol for
//! other nodes, when run by a [HttpServer](crate::server::HttpServer).
//!
//! The peers are read from the config and replaced as a whole once the config changes:
//!
//! ```yaml
//! peers:
//!     self: http://10.0.0.1:8001
//!     replicas: 50
//!     timeout: 5s
//!     nodes:
//!         - http://10.0.0.1:8001
//!         - http://10.0.0.2:8001
//! ```
//!
//! # Examples
//! ```
//! # use std::sync::Arc;
//! # use peercache::pool::{HttpPool, PoolSettings};
//! # use peercache::peers::{PeerGetter, PeerPicker};
//! # use peercache::registry::GroupRegistry;
//! # #[tokio::main]
//! # async fn main() {
//! let pool = HttpPool::new(
//!     PoolSettings::new("http://10.0.0.1:8001"),
//!     Arc::new(GroupRegistry::new()),
//! );
//! pool.set(&["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//!
//! // Keys owned by the local node yield None...
//! for key in ["Tom", "Jack", "Sam"] {
//!     if let Some(peer) = pool.pick_peer(key) {
//!         assert_eq!(peer.address(), "http://10.0.0.2:8001");
//!     }
//! }
//! # }
//! ```
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use hyper::{Body, Method, StatusCode};

use crate::client::{new_client, HttpClient, HttpGetter};
use crate::config::{Config, Handle};
use crate::errors::CacheError;
use crate::peers::{PeerGetter, PeerPicker, Request};
use crate::platform::Platform;
use crate::registry::GroupRegistry;
use crate::ring::HashRing;
use crate::server::{respond, text_response, Handler};
use crate::spawn;

/// Contains the path on which the peer protocol is served.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

/// Contains the number of positions each peer occupies on the ring.
pub const DEFAULT_REPLICAS: usize = 50;

/// Contains the maximal duration of a peer request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Contains the port of the peer server if none is configured.
pub const DEFAULT_PORT: u16 = 8001;

/// Describes the cluster as seen by the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Contains the address of the local node, as it appears in **nodes**.
    pub self_address: String,
    /// Contains the number of ring positions per node.
    pub replicas: usize,
    /// Contains the timeout applied to each peer request.
    pub timeout: Duration,
    /// Contains the addresses of all nodes of the cluster.
    pub nodes: Vec<String>,
}

impl PoolSettings {
    /// Creates the settings for a node which doesn't know any peers yet.
    pub fn new(self_address: impl Into<String>) -> Self {
        PoolSettings {
            self_address: self_address.into(),
            replicas: DEFAULT_REPLICAS,
            timeout: DEFAULT_TIMEOUT,
            nodes: Vec::new(),
        }
    }

    /// Reads the settings from the **peers** section of the given config.
    ///
    /// If **peers.self** is missing, the local node is assumed to be reachable on 127.0.0.1 via
    /// the configured **server.port**.
    pub fn from_config(handle: &Handle) -> anyhow::Result<Self> {
        let self_address = match handle.query("peers.self").as_str() {
            Some(address) => address.to_owned(),
            None => format!(
                "http://127.0.0.1:{}",
                handle
                    .query("server.port")
                    .as_i64()
                    .unwrap_or(DEFAULT_PORT as i64)
            ),
        };

        let replicas = match handle.query("peers.replicas").as_i64() {
            Some(replicas) if replicas > 0 => replicas as usize,
            Some(replicas) => {
                return Err(anyhow::anyhow!(
                    "peers.replicas must be positive but was {}",
                    replicas
                ))
            }
            None => DEFAULT_REPLICAS,
        };

        Ok(PoolSettings {
            self_address,
            replicas,
            timeout: handle.duration("peers.timeout")?.unwrap_or(DEFAULT_TIMEOUT),
            nodes: handle.strings("peers.nodes"),
        })
    }
}

struct PeerSet {
    settings: PoolSettings,
    ring: HashRing,
    getters: HashMap<String, Arc<dyn PeerGetter>>,
}

/// Picks peers via consistent hashing and serves the peer protocol.
pub struct HttpPool {
    base_path: String,
    registry: Arc<GroupRegistry>,
    client: HttpClient,
    peers: ArcSwap<PeerSet>,
}

impl HttpPool {
    /// Creates a new pool for the given settings.
    ///
    /// The **registry** is used to resolve the groups named in incoming peer requests.
    pub fn new(settings: PoolSettings, registry: Arc<GroupRegistry>) -> Self {
        let client = new_client();
        let peers = HttpPool::build_peers(settings, &client, DEFAULT_BASE_PATH);

        HttpPool {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            registry,
            client,
            peers: ArcSwap::new(Arc::new(peers)),
        }
    }

    fn build_peers(settings: PoolSettings, client: &HttpClient, base_path: &str) -> PeerSet {
        let mut ring = HashRing::new(settings.replicas, None);
        ring.add(&settings.nodes);

        let getters = ring
            .nodes()
            .iter()
            .filter(|node| **node != settings.self_address)
            .map(|node| {
                let getter: Arc<dyn PeerGetter> = Arc::new(HttpGetter::new(
                    node,
                    base_path,
                    client.clone(),
                    settings.timeout,
                ));
                (node.clone(), getter)
            })
            .collect();

        PeerSet {
            settings,
            ring,
            getters,
        }
    }

    /// Replaces the whole peer set (including the local node) with the given settings.
    pub fn apply(&self, settings: PoolSettings) {
        if self.peers.load().settings == settings {
            return;
        }

        log::info!(
            "Using {} peer(s) as {}: {}",
            settings.nodes.len(),
            &settings.self_address,
            settings.nodes.join(", ")
        );
        self.peers.store(Arc::new(HttpPool::build_peers(
            settings,
            &self.client,
            &self.base_path,
        )));
    }

    /// Replaces the known peers with the given list of node addresses.
    ///
    /// The list should also contain the address of the local node, otherwise no key will ever be
    /// owned locally.
    pub fn set<S: AsRef<str>>(&self, nodes: &[S]) {
        let mut settings = self.settings();
        settings.nodes = nodes.iter().map(|node| node.as_ref().to_owned()).collect();
        self.apply(settings);
    }

    /// Returns the settings currently in use.
    pub fn settings(&self) -> PoolSettings {
        self.peers.load().settings.clone()
    }

    /// Returns the path on which the peer protocol is served.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    async fn handle_peer_request(&self, request: hyper::Request<Body>) -> hyper::Response<Body> {
        if !request.uri().path().starts_with(&self.base_path) {
            return text_response(
                StatusCode::NOT_FOUND,
                format!("Unexpected path: {}", request.uri().path()),
            );
        }
        if request.method() != Method::POST {
            return text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Peer requests have to use POST",
            );
        }

        let body = match hyper::body::to_bytes(request.into_body()).await {
            Ok(body) => body,
            Err(error) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request: {}", error),
                )
            }
        };
        let peer_request: Request = match serde_json::from_slice(&body) {
            Ok(peer_request) => peer_request,
            Err(error) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("Malformed peer request: {}", error),
                )
            }
        };

        log::debug!(
            "[{}] Peer request for {}/{}",
            &self.peers.load().settings.self_address,
            &peer_request.group,
            &peer_request.key
        );

        let group = match self.registry.get_group(&peer_request.group) {
            Some(group) => group,
            None => {
                return text_response(
                    StatusCode::NOT_FOUND,
                    format!("No such group: {}", &peer_request.group),
                )
            }
        };

        match group.get(&peer_request.key).await {
            Ok(value) => respond(StatusCode::OK, "application/octet-stream", value.bytes()),
            Err(CacheError::InvalidArgument(message)) => {
                text_response(StatusCode::BAD_REQUEST, message)
            }
            Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.load();
        let owner = peers.ring.get(key)?;
        if owner == peers.settings.self_address {
            return None;
        }

        log::debug!("Picked peer {} for {}.", owner, key);
        peers.getters.get(owner).cloned()
    }
}

#[async_trait::async_trait]
impl Handler for HttpPool {
    async fn handle(&self, request: hyper::Request<Body>) -> hyper::Response<Body> {
        self.handle_peer_request(request).await
    }
}

/// Creates and installs a **HttpPool** into the given platform.
///
/// This requires a [GroupRegistry] to be present. If a [Config] is present, the peers are read
/// from there and updated once the config changes.
pub fn install(platform: Arc<Platform>) -> Arc<HttpPool> {
    let registry = platform.require::<GroupRegistry>();
    let config = platform.find::<Config>();

    let settings = match config
        .as_ref()
        .map(|config| PoolSettings::from_config(&config.current()))
    {
        Some(Ok(settings)) => settings,
        Some(Err(error)) => {
            log::error!("Invalid peer configuration: {:#}", error);
            PoolSettings::new(format!("http://127.0.0.1:{}", DEFAULT_PORT))
        }
        None => PoolSettings::new(format!("http://127.0.0.1:{}", DEFAULT_PORT)),
    };

    let pool = Arc::new(HttpPool::new(settings, registry));
    platform.register::<HttpPool>(pool.clone());

    if let Some(config) = config {
        let pool = pool.clone();
        let mut notifier = config.notifier();
        spawn!(async move {
            while platform.is_running() {
                if let Err(tokio::sync::broadcast::error::RecvError::Closed) =
                    notifier.recv().await
                {
                    return;
                }

                match PoolSettings::from_config(&config.current()) {
                    Ok(settings) => pool.apply(settings),
                    Err(error) => log::error!("Invalid peer configuration: {:#}", error),
                }
            }
        });
    }

    pool
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::group::GetterFunc;
    use crate::peers::{PeerGetter, PeerPicker, Request};
    use crate::platform::Platform;
    use crate::pool::{HttpPool, PoolSettings};
    use crate::registry::GroupRegistry;
    use crate::server::HttpServer;
    use std::sync::Arc;
    use std::time::Duration;

    fn scores(registry: &GroupRegistry) {
        let _ = registry
            .new_group(
                "scores",
                2 << 10,
                GetterFunc(|key: &str| match key {
                    "Tom" => Ok(b"630".to_vec()),
                    "Jack" => Ok(b"589".to_vec()),
                    "Sam" => Ok(b"567".to_vec()),
                    _ => Err(anyhow::anyhow!("{} not exist", key)),
                }),
            )
            .unwrap();
    }

    #[test]
    fn the_local_node_is_never_picked() {
        crate::testing::test_async(async {
            let pool = HttpPool::new(
                PoolSettings::new("http://127.0.0.1:8001"),
                Arc::new(GroupRegistry::new()),
            );

            // Without any peers, everything is computed locally...
            assert_eq!(pool.pick_peer("Tom").is_none(), true);

            pool.set(&[
                "http://127.0.0.1:8001",
                "http://127.0.0.1:8002",
                "http://127.0.0.1:8003",
            ]);

            let mut local = 0;
            let mut remote = 0;
            for i in 0..1000 {
                match pool.pick_peer(&format!("key-{}", i)) {
                    Some(peer) => {
                        assert_ne!(peer.address(), "http://127.0.0.1:8001");
                        remote += 1;
                    }
                    None => local += 1,
                }
            }
            assert_eq!(local > 0, true);
            assert_eq!(remote > 0, true);

            // A single node cluster owns all keys...
            pool.set(&["http://127.0.0.1:8001"]);
            assert_eq!(pool.pick_peer("Tom").is_none(), true);
        });
    }

    #[test]
    fn settings_are_read_from_the_config() {
        let config = Config::new("test.yml");
        config
            .load_from_string(
                "
server:
    port: 8005
peers:
    replicas: 3
    timeout: 250ms
    nodes:
        - http://127.0.0.1:8005
        - http://127.0.0.1:8006
",
                None,
            )
            .unwrap();

        let settings = PoolSettings::from_config(&config.current()).unwrap();
        assert_eq!(settings.self_address, "http://127.0.0.1:8005");
        assert_eq!(settings.replicas, 3);
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.nodes.len(), 2);

        config
            .load_from_string("peers:\n    replicas: -1", None)
            .unwrap();
        assert_eq!(PoolSettings::from_config(&config.current()).is_err(), true);
    }

    #[test]
    fn values_are_served_to_peers() {
        // We need exclusive access to the test ports...
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();

        crate::testing::test_async(async {
            let platform = Platform::new();
            let config = Arc::new(Config::new("test.yml"));
            config
                .load_from_string("server:\n    host: 127.0.0.1\n    port: 1503", None)
                .unwrap();
            platform.register::<Config>(config);

            let registry = crate::registry::install(platform.clone());
            scores(&registry);
            let pool = crate::pool::install(platform.clone());
            HttpServer::fork_and_await(&HttpServer::new(&platform, "server", 1, pool)).await;

            // Act as the other node of a two node cluster...
            let remote = HttpPool::new(
                PoolSettings::new("http://127.0.0.1:1504"),
                Arc::new(GroupRegistry::new()),
            );
            remote.set(&["http://127.0.0.1:1503"]);
            let peer = remote.pick_peer("Tom").unwrap();

            let response = peer
                .get(&Request {
                    group: "scores".to_owned(),
                    key: "Tom".to_owned(),
                })
                .await
                .unwrap();
            assert_eq!(response.value, b"630".to_vec());

            // Failures are reported as errors...
            let unknown_key = peer
                .get(&Request {
                    group: "scores".to_owned(),
                    key: "Kim".to_owned(),
                })
                .await;
            assert_eq!(
                unknown_key.unwrap_err().to_string().contains("Kim not exist"),
                true
            );

            let unknown_group = peer
                .get(&Request {
                    group: "unknown".to_owned(),
                    key: "Tom".to_owned(),
                })
                .await;
            assert_eq!(
                unknown_group.unwrap_err().to_string().contains("404"),
                true
            );

            platform.terminate();
        });
    }
}
