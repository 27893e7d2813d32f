//! Provides a builder which sets up the components of a node.
//!
//! As most components are optional, the builder permits to selectively enable them. Note that
//! some components depend on others: the peer pool requires the group registry, and both pick up
//! their settings from the config if it is enabled.
//!
//! # Example
//! Setting up a node with all components enabled:
//! ```no_run
//! # use std::sync::Arc;
//! # use peercache::builder::Builder;
//! # use peercache::pool::HttpPool;
//! # use peercache::server::HttpServer;
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Create groups via the GroupRegistry here...
//!
//!     let pool = platform.require::<HttpPool>();
//!     HttpServer::new(&platform, "server", 8001, pool).event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and installing the enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_groups: bool,
    setup_peers: bool,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all components.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_groups = true;
        self.setup_peers = true;

        self
    }

    /// Initializes **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables logging after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Terminates the platform once **CTRL-C**, **SIGHUP** or **SIGTERM** is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables the signal listener after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs a [Config](crate::config::Config) which is loaded from **config/settings.yml**.
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables the config after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Installs a [GroupRegistry](crate::registry::GroupRegistry).
    pub fn enable_groups(mut self) -> Self {
        self.setup_groups = true;
        self
    }

    /// Disables the group registry after [enable_all()](Builder::enable_all) has been used.
    ///
    /// Note that this also disables the peer pool.
    pub fn disable_groups(mut self) -> Self {
        self.setup_groups = false;
        self
    }

    /// Installs a [HttpPool](crate::pool::HttpPool) (and therefore also the group registry).
    ///
    /// Note that the pool still has to be served by a [HttpServer](crate::server::HttpServer).
    pub fn enable_peers(mut self) -> Self {
        self.setup_groups = true;
        self.setup_peers = true;
        self
    }

    /// Disables the peer pool after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.setup_peers = false;
        self
    }

    /// Builds the [Platform] with all enabled components being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            let _ = crate::config::install(platform.clone()).await;
        }

        if self.setup_groups {
            let _ = crate::registry::install(platform.clone());

            if self.setup_peers {
                let _ = crate::pool::install(platform.clone());
            }
        }

        platform
    }
}
