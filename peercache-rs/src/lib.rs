//! peercache is an embeddable lookaside cache which shares cached values across a fleet of peers.
//!
//! # Introduction
//! Applications often sit in front of an expensive keyed lookup (think of a database query or a
//! remote API call). **peercache** caches the results of such lookups in memory. Other than a
//! plain local cache, each key is owned by exactly one node of the cluster (determined via
//! consistent hashing). A node which misses a key asks the owning peer, so that each value is
//! only computed once for the whole fleet and then reused everywhere.
//!
//! # Features
//! * **Bounded memory**: each [Group](group::Group) keeps its values in a size constrained
//!   [LRU cache](lru::LRUCache) which evicts the least recently used entries.
//! * **Request coalescing**: concurrent misses for the same key are collapsed into a single load
//!   (see [Flight](flight::Flight)), so that a popular key cannot stampede the data source.
//! * **Consistent hashing**: keys are mapped to peers via a [HashRing](ring::HashRing) with
//!   virtual replicas, so that only a fraction of all keys move if the cluster changes.
//! * **100% async/await**: everything builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config**: the list of peers, the server addresses and the group budgets can
//!   be changed while the node is running. No restart is required, which would otherwise throw
//!   away all cached values.
//!
//! # Modules
//! * **Core**: [byteview], [lru], [flight], [ring], [group] and [peers] provide the cache itself.
//! * **Networking**: [pool] and [client] implement the peer protocol on top of HTTP, [api]
//!   exposes groups to external callers and [server] runs both.
//! * **Infrastructure**: [platform], [builder], [config], [signals] and [fmt] set up and run a
//!   node.
//!
//! # Examples
//! A complete node can be found in **peercache-node**. A minimal setup looks like this:
//! ```no_run
//! # use std::sync::Arc;
//! # use peercache::builder::Builder;
//! # use peercache::group::GetterFunc;
//! # use peercache::pool::HttpPool;
//! # use peercache::registry::GroupRegistry;
//! # use peercache::server::HttpServer;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     let group = platform.require::<GroupRegistry>().new_group(
//!         "scores",
//!         2 << 10,
//!         GetterFunc(|key: &str| Ok(format!("score of {}", key).into_bytes())),
//!     )?;
//!
//!     let pool = platform.require::<HttpPool>();
//!     group.register_peers(pool.clone());
//!     HttpServer::new(&platform, "server", 8001, pool).event_loop().await;
//!
//!     Ok(())
//! }
//! ```
#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(missing_docs)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod api;
pub mod builder;
pub mod byteview;
pub mod client;
pub mod config;
pub mod errors;
pub mod flight;
pub mod fmt;
pub mod group;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod pool;
pub mod registry;
pub mod ring;
pub mod server;
pub mod signals;

/// Contains the version of the peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up a
/// node, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests might initialize the logging system several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async block within `tokio::spawn`.
///
/// The returned join handle is dropped, so the task simply runs in the background.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
