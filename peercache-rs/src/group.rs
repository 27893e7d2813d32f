//! Provides the central component of the cache: a named **Group** of keys.
//!
//! A group ties together a local [LRUCache](crate::lru::LRUCache), a [Flight] which collapses
//! concurrent misses, an optional [PeerPicker] which knows which peer owns a key and a
//! [Getter] which loads a value from the underlying data source.
//!
//! Reading a key works like this:
//! 1. If the key is present in the local cache, the cached value is returned.
//! 2. Otherwise the value is loaded within a flight, so that concurrent misses for the same key
//!    only result in a single load.
//! 3. If a peer owns the key, the value is fetched from there. Note that such values are **not**
//!    stored locally, as the owning peer already caches them.
//! 4. If no peer is responsible (or if the peer fails), the value is computed by the getter and
//!    stored in the local cache.
//!
//! # Examples
//! ```
//! # use peercache::group::{Group, GetterFunc};
//! # #[tokio::main]
//! # async fn main() {
//! let group = Group::new(
//!     "scores",
//!     2 << 10,
//!     GetterFunc(|key: &str| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     }),
//! );
//!
//! assert_eq!(group.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(group.get("Kim").await.is_err(), true);
//! # }
//! ```
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::byteview::ByteView;
use crate::errors::CacheError;
use crate::flight::Flight;
use crate::fmt::format_size;
use crate::lru::LRUCache;
use crate::peers::{PeerGetter, PeerPicker, Request};

/// Loads the value for a key from the underlying data source.
///
/// This is invoked whenever a key is missing in the cache and owned by the local node.
#[async_trait::async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain closure so that it can be used as [Getter].
pub struct GetterFunc<F>(pub F)
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync;

#[async_trait::async_trait]
impl<F> Getter for GetterFunc<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

/// Provides a snapshot of the counters of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Contains the number of calls to [Group::get].
    pub gets: usize,
    /// Contains the number of gets which were served by the local cache.
    pub cache_hits: usize,
    /// Contains the number of loads which were actually performed (after deduplication).
    pub loads: usize,
    /// Contains the number of callers which waited for a load performed by another caller.
    pub loads_deduped: usize,
    /// Contains the number of values fetched from a peer.
    pub peer_loads: usize,
    /// Contains the number of failed peer requests.
    pub peer_errors: usize,
    /// Contains the number of values computed by the local getter.
    pub local_loads: usize,
    /// Contains the number of failed local computations.
    pub local_load_errors: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    cache_hits: AtomicUsize,
    loads: AtomicUsize,
    loads_deduped: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    local_loads: AtomicUsize,
    local_load_errors: AtomicUsize,
}

impl Counters {
    fn increment(counter: &AtomicUsize) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Represents a cache namespace along with the getter which loads its values.
pub struct Group {
    name: String,
    getter: Box<dyn Getter>,
    main_cache: Mutex<LRUCache<ByteView>>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: Flight<Result<ByteView, CacheError>>,
    counters: Counters,
}

impl Group {
    /// Creates a new group which keeps at most **max_memory** bytes in its local cache.
    ///
    /// A budget of 0 disables the size constraint. Note that this doesn't register the group
    /// anywhere, use [GroupRegistry::new_group](crate::registry::GroupRegistry::new_group) to make
    /// it reachable by peers.
    pub fn new(name: impl Into<String>, max_memory: usize, getter: impl Getter + 'static) -> Self {
        let name = name.into();
        let group_name = name.clone();
        let main_cache = LRUCache::with_eviction_callback(
            max_memory,
            Box::new(move |key: String, value: ByteView| {
                log::debug!(
                    "Evicted {} ({}) from group {}.",
                    key,
                    format_size(value.len()),
                    group_name
                );
            }),
        );

        Group {
            name,
            getter: Box::new(getter),
            main_cache: Mutex::new(main_cache),
            peers: OnceLock::new(),
            flight: Flight::new(),
            counters: Counters::default(),
        }
    }

    /// Returns the name of the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches the picker which determines the owning peer of a key.
    ///
    /// # Panics
    /// Panics if a picker has already been attached.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!(
                "Peers have already been registered for group {}!",
                self.name
            );
        }
    }

    /// Returns the value for the given key.
    ///
    /// The value is either served from the local cache, fetched from the owning peer or computed
    /// by the getter of this group.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        Counters::increment(&self.counters.gets);

        if key.is_empty() {
            return Err(CacheError::InvalidArgument("A key is required".to_owned()));
        }

        if let Some(value) = self.lookup_cache(key) {
            Counters::increment(&self.counters.cache_hits);
            log::debug!("Cache hit for {} in group {}.", key, self.name);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        let mut leader = false;
        let result = self
            .flight
            .execute(key, || {
                leader = true;
                self.load_once(key)
            })
            .await;

        if !leader {
            Counters::increment(&self.counters.loads_deduped);
        }

        result
    }

    async fn load_once(&self, key: &str) -> Result<ByteView, CacheError> {
        // A previous wave of callers might have populated the cache in the meantime...
        if let Some(value) = self.lookup_cache(key) {
            return Ok(value);
        }

        Counters::increment(&self.counters.loads);

        if let Some(peer) = self.peers.get().and_then(|peers| peers.pick_peer(key)) {
            match self.get_from_peer(peer.as_ref(), key).await {
                Ok(value) => {
                    Counters::increment(&self.counters.peer_loads);
                    return Ok(value);
                }
                Err(error) => {
                    Counters::increment(&self.counters.peer_errors);
                    log::warn!("{} Computing {} locally...", error, key);
                }
            }
        }

        self.get_locally(key).await
    }

    async fn get_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
    ) -> Result<ByteView, CacheError> {
        let request = Request {
            group: self.name.clone(),
            key: key.to_owned(),
        };

        match peer.get(&request).await {
            Ok(response) => Ok(ByteView::from(response.value)),
            Err(error) => Err(CacheError::peer(peer.address(), error)),
        }
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        match self.getter.get(key).await {
            Ok(data) => {
                Counters::increment(&self.counters.local_loads);
                let value = ByteView::copy_from(&data);
                self.populate_cache(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                Counters::increment(&self.counters.local_load_errors);
                Err(CacheError::upstream(error))
            }
        }
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        self.main_cache.lock().unwrap().get(key).cloned()
    }

    fn populate_cache(&self, key: &str, value: ByteView) {
        self.main_cache.lock().unwrap().put(key.to_owned(), value);
    }

    /// Changes the maximal number of bytes kept in the local cache.
    ///
    /// If the new budget is smaller than the current usage, entries are evicted immediately.
    pub fn set_max_memory(&self, max_memory: usize) {
        self.main_cache.lock().unwrap().set_max_memory(max_memory);
    }

    /// Returns the maximal number of bytes kept in the local cache.
    pub fn max_memory(&self) -> usize {
        self.main_cache.lock().unwrap().max_memory()
    }

    /// Returns the number of bytes currently occupied by the local cache.
    pub fn cache_bytes(&self) -> usize {
        self.main_cache.lock().unwrap().allocated_memory()
    }

    /// Returns the number of entries in the local cache.
    pub fn cache_entries(&self) -> usize {
        self.main_cache.lock().unwrap().len()
    }

    /// Returns a snapshot of the counters of this group.
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            loads_deduped: self.counters.loads_deduped.load(Ordering::Relaxed),
            peer_loads: self.counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.counters.peer_errors.load(Ordering::Relaxed),
            local_loads: self.counters.local_loads.load(Ordering::Relaxed),
            local_load_errors: self.counters.local_load_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::errors::CacheError;
    use crate::group::{Getter, GetterFunc, Group};
    use crate::peers::{PeerGetter, PeerPicker, Request, Response};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Creates the "scores" group backed by a tiny database which counts its lookups per key.
    fn scores(load_counts: Arc<Mutex<HashMap<String, usize>>>) -> Group {
        let db: HashMap<&str, &str> = [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
            .into_iter()
            .collect();

        Group::new(
            "scores",
            2 << 10,
            GetterFunc(move |key: &str| {
                *load_counts
                    .lock()
                    .unwrap()
                    .entry(key.to_owned())
                    .or_default() += 1;

                db.get(key)
                    .map(|value| value.as_bytes().to_vec())
                    .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
            }),
        )
    }

    struct FakePeer {
        fail: bool,
        requests: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PeerGetter for FakePeer {
        fn address(&self) -> &str {
            "http://10.0.0.2:8001"
        }

        async fn get(&self, request: &Request) -> anyhow::Result<Response> {
            let _ = self.requests.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow::anyhow!("connection refused"))
            } else {
                Ok(Response {
                    value: format!("{}@peer", request.key).into_bytes(),
                })
            }
        }
    }

    struct FakePicker(Arc<FakePeer>);

    impl PeerPicker for FakePicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        crate::testing::test_async(async {
            let load_counts = Arc::new(Mutex::new(HashMap::new()));
            let group = scores(load_counts.clone());

            for (name, score) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
                assert_eq!(group.get(name).await.unwrap().to_string(), score);
                assert_eq!(group.get(name).await.unwrap().to_string(), score);
                assert_eq!(load_counts.lock().unwrap()[name], 1);
            }

            match group.get("unknown").await {
                Err(CacheError::UpstreamLoadFailure(error)) => {
                    assert_eq!(error.to_string(), "unknown not exist")
                }
                other => panic!("Unexpected result: {:?}", other),
            }

            // Failures are not cached, therefore the getter is invoked again...
            assert_eq!(group.get("unknown").await.is_err(), true);
            assert_eq!(load_counts.lock().unwrap()["unknown"], 2);

            let stats = group.stats();
            assert_eq!(stats.gets, 8);
            assert_eq!(stats.cache_hits, 3);
            assert_eq!(stats.local_loads, 3);
            assert_eq!(stats.local_load_errors, 2);
            assert_eq!(group.cache_entries(), 3);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        crate::testing::test_async(async {
            let load_counts = Arc::new(Mutex::new(HashMap::new()));
            let group = scores(load_counts.clone());

            match group.get("").await {
                Err(CacheError::InvalidArgument(_)) => (),
                other => panic!("Unexpected result: {:?}", other),
            }
            assert_eq!(load_counts.lock().unwrap().is_empty(), true);
        });
    }

    #[test]
    fn values_from_peers_are_not_cached_locally() {
        crate::testing::test_async(async {
            let load_counts = Arc::new(Mutex::new(HashMap::new()));
            let group = scores(load_counts.clone());
            let peer = Arc::new(FakePeer {
                fail: false,
                requests: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(FakePicker(peer.clone())));

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "Tom@peer");
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "Tom@peer");

            assert_eq!(peer.requests.load(Ordering::SeqCst), 2);
            assert_eq!(group.cache_entries(), 0);
            assert_eq!(load_counts.lock().unwrap().is_empty(), true);
            assert_eq!(group.stats().peer_loads, 2);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_local_getter() {
        crate::testing::test_async(async {
            let load_counts = Arc::new(Mutex::new(HashMap::new()));
            let group = scores(load_counts.clone());
            let peer = Arc::new(FakePeer {
                fail: true,
                requests: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(FakePicker(peer.clone())));

            assert_eq!(group.get("Jack").await.unwrap().to_string(), "589");
            assert_eq!(load_counts.lock().unwrap()["Jack"], 1);
            assert_eq!(group.stats().peer_errors, 1);

            // The locally computed value is cached, so the peer isn't asked again...
            assert_eq!(group.get("Jack").await.unwrap().to_string(), "589");
            assert_eq!(peer.requests.load(Ordering::SeqCst), 1);
            assert_eq!(group.cache_entries(), 1);
        });
    }

    #[test]
    #[should_panic]
    fn peers_can_only_be_registered_once() {
        let group = scores(Arc::new(Mutex::new(HashMap::new())));
        let peer = Arc::new(FakePeer {
            fail: false,
            requests: AtomicUsize::new(0),
        });

        group.register_peers(Arc::new(FakePicker(peer.clone())));
        group.register_peers(Arc::new(FakePicker(peer)));
    }

    struct SlowGetter {
        invocations: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Getter for SlowGetter {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(key.to_uppercase().into_bytes())
        }
    }

    #[test]
    fn concurrent_misses_invoke_the_getter_once() {
        crate::testing::test_async(async {
            let group = Arc::new(Group::new(
                "slow",
                0,
                SlowGetter {
                    invocations: AtomicUsize::new(0),
                },
            ));

            let mut tasks = Vec::new();
            for _ in 0..10 {
                let group = group.clone();
                tasks.push(tokio::spawn(async move { group.get("tom").await }));
            }

            for result in futures::future::join_all(tasks).await {
                assert_eq!(result.unwrap().unwrap().to_string(), "TOM");
            }

            let stats = group.stats();
            assert_eq!(stats.loads, 1);
            assert_eq!(stats.local_loads, 1);
            assert_eq!(stats.loads_deduped, 9);
        });
    }

    #[test]
    fn values_cached_by_a_previous_wave_are_not_loaded_again() {
        crate::testing::test_async(async {
            let load_counts = Arc::new(Mutex::new(HashMap::new()));
            let group = scores(load_counts.clone());

            // A caller which missed the cache right before another wave stored the value...
            group.populate_cache("Tom", ByteView::from("630"));
            assert_eq!(group.load("Tom").await.unwrap().to_string(), "630");

            let stats = group.stats();
            assert_eq!(stats.loads, 0);
            assert_eq!(stats.local_loads, 0);
            assert_eq!(load_counts.lock().unwrap().is_empty(), true);
        });
    }

    #[test]
    fn the_budget_is_respected() {
        crate::testing::test_async(async {
            let group = Group::new(
                "budget",
                64,
                GetterFunc(|key: &str| Ok(vec![b'x'; key.len() * 4])),
            );

            for i in 0..100 {
                let _ = group.get(&format!("key-{}", i)).await.unwrap();
                assert_eq!(group.cache_bytes() <= 64, true);
            }

            group.set_max_memory(20);
            assert_eq!(group.cache_bytes() <= 20, true);
            assert_eq!(group.max_memory(), 20);
        });
    }
}
