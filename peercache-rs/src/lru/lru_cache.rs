use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the number of bytes this value accounts for in a cache.
    ///
    /// The cache adds the length of the key to this value to determine the footprint of an entry.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Describes the callback which is notified once an entry has been evicted.
///
/// The callback is invoked after the entry has been completely detached from the cache. Note
/// that it must not call back into the owning cache, as the cache is most probably still locked
/// by the caller which triggered the eviction.
pub type EvictionCallback<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a memory constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, once
/// the accounted memory (the sum of the lengths of all keys and values) grows above the given
/// limit, old (least recently used) entries will be evicted - hence the name LRU cache.
///
/// A **max_memory** of 0 disables the limit altogether.
///
/// Note that the cache itself performs no locking, it has to be guarded by its owner.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// // Specifies a cache which can hold up to 16 bytes of keys and values...
/// let mut lru = LRUCache::new(16);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit (6 + 10 bytes)..
/// lru.put("Foo1".to_owned(), "XXXXXX".to_owned());
/// assert_eq!(lru.get("Foo").is_some(), true);
///
/// // this will hit the memory constraint...
/// lru.put("Foo2".to_owned(), "XXXXXX".to_owned());
/// // ..and therefore throws out the least recently used entry ("Foo1" as we just read "Foo"):
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    map: LinkedHashMap<String, Entry<V>>,
    on_evicted: Option<EvictionCallback<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which keeps entries until they allocate more than **max_memory**
    /// bytes. Passing 0 creates an unbounded cache.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            map: LinkedHashMap::new(),
            on_evicted: None,
        }
    }

    /// Creates a new cache which notifies the given callback for each evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    /// let mut lru = LRUCache::with_eviction_callback(
    ///     9,
    ///     Box::new(move |key: String, _value: String| log.lock().unwrap().push(key)),
    /// );
    ///
    /// lru.put("A".to_owned(), "1234".to_owned());
    /// lru.put("B".to_owned(), "1234".to_owned());
    ///
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["A".to_owned()]);
    /// ```
    pub fn with_eviction_callback(max_memory: usize, on_evicted: EvictionCallback<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(on_evicted);
        cache
    }

    /// Installs or replaces the eviction callback.
    pub fn set_on_evicted(&mut self, on_evicted: EvictionCallback<V>) {
        self.on_evicted = Some(on_evicted);
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the accounted memory is adjusted
    /// by the difference in size. Either way, the entry becomes the most recently used one.
    /// Afterwards, the least recently used entries are evicted until the cache fits into its
    /// memory limit again (or is empty, if the entry itself exceeds the limit).
    pub fn put(&mut self, key: String, value: V) {
        let mem_size = key.len() + value.allocated_size();
        let entry = Entry { mem_size, value };

        self.writes += 1;
        self.allocated_memory += mem_size;
        if let Some(stale_entry) = self.map.insert(key, entry) {
            self.allocated_memory -= stale_entry.mem_size;
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory > 0 && self.allocated_memory > self.max_memory {
            if !self.remove_oldest() {
                break;
            }
        }
    }

    /// Evicts the least recently used entry.
    ///
    /// Returns **true** if an entry was evicted or **false** if the cache was already empty.
    /// If present, the eviction callback is invoked once the entry is fully detached.
    pub fn remove_oldest(&mut self) -> bool {
        match self.map.pop_front() {
            Some((key, entry)) => {
                self.allocated_memory -= entry.mem_size;
                self.evictions += 1;
                self.notify_evicted(key, entry.value);
                true
            }
            None => false,
        }
    }

    fn notify_evicted(&mut self, key: String, value: V) {
        if let Some(callback) = self.on_evicted.as_mut() {
            callback(key, value);
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Removes the entry for the given key if present.
    ///
    /// Just like an eviction, this will notify the eviction callback.
    pub fn remove(&mut self, key: &str) -> bool {
        self.writes += 1;

        match self.map.remove(key) {
            Some(entry) => {
                self.allocated_memory -= entry.mem_size;
                self.notify_evicted(key.to_owned(), entry.value);
                true
            }
            None => false,
        }
    }

    /// Removes all entries in this cache without notifying the eviction callback.
    ///
    /// Note that this will also zero all metrics.
    pub fn flush(&mut self) {
        self.map.clear();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
        self.evictions = 0;
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be occupied by this cache (0 = unbounded).
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be occupied by this cache.
    ///
    /// Shrinking the limit immediately evicts entries until the cache fits again.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // Each entry accounts for 7 bytes...
    /// lru.put("Foo0".to_owned(), "Bar".to_owned());
    /// lru.put("Foo1".to_owned(), "Bar".to_owned());
    /// lru.put("Foo2".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.len(), 3);
    ///
    /// // Now request that the cache is reduced to only 14 bytes...
    /// lru.set_max_memory(14);
    ///
    /// // .. this will kick out the oldest entry..
    /// assert_eq!(lru.len(), 2);
    /// assert_eq!(lru.get("Foo0"), None);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: usize) {
        self.max_memory = max_memory;
        self.enforce_constraints();
    }

    /// Returns the amount of memory accounted for all keys and values in this cache.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the memory utilization in percent (always 0 for an unbounded cache).
    pub fn memory_utilization(&self) -> f32 {
        match self.max_memory {
            0 => 0.,
            max => self.allocated_memory as f32 / max as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries evicted due to memory pressure since the last flush.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::LRUCache;
    use std::sync::{Arc, Mutex};

    #[test]
    fn max_memory_is_enforced() {
        let mut lru = LRUCache::new(12 * 4);

        // We expect 4 entries with a size of 12 bytes each to fully fit in the cache....
        lru.put("Hello0".to_owned(), "World0".to_owned());
        lru.put("Hello1".to_owned(), "World1".to_owned());
        lru.put("Hello2".to_owned(), "World2".to_owned());
        lru.put("Hello3".to_owned(), "World3".to_owned());
        assert_eq!(lru.len(), 4);
        assert_eq!(lru.allocated_memory(), 12 * 4);

        // If we remove an entry, the used memory is corrected...
        assert!(lru.remove("Hello0"));
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we replace an entry, the used memory is corrected...
        lru.put("Hello1".to_owned(), "".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 3 - 6);

        // Restore the original entry, so that the table has three entries with 12 bytes each...
        lru.put("Hello1".to_owned(), "World1".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we now add an entry which is 13 bytes long, one entry has to be dropped and therefore
        // we end up with three remaining entries....
        lru.put("Hello0".to_owned(), "World01".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 2 + 13);
        assert_eq!(lru.len(), 3);
        // "Hello2" was the least recently touched/modified, so it will have been evicted to make
        // room for our new entry...
        assert_eq!(lru.get("Hello2"), None);
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn usage_never_exceeds_budget() {
        let mut lru = LRUCache::new(64);

        for i in 0..500 {
            let key = format!("key-{}", i % 37);
            let value = "x".repeat(i % 23);
            lru.put(key, value);

            assert!(lru.allocated_memory() <= 64);
        }
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        // Each entry accounts for 3 bytes...
        let mut lru = LRUCache::new(9);
        lru.put("A".to_owned(), "A1".to_owned());
        lru.put("B".to_owned(), "B1".to_owned());
        lru.put("C".to_owned(), "C1".to_owned());
        assert_eq!(lru.len(), 3);

        // Touching "A" saves it from being evicted...
        assert!(lru.get("A").is_some());

        // ...therefore "B" is the one which has to make room for "D"...
        lru.put("D".to_owned(), "D1".to_owned());
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.get("B"), None);
        assert!(lru.get("A").is_some());
        assert!(lru.get("C").is_some());
        assert!(lru.get("D").is_some());
    }

    #[test]
    fn overwrites_are_accounted_by_delta() {
        let mut lru = LRUCache::new(0);
        lru.put("key".to_owned(), "1234".to_owned());
        assert_eq!(lru.allocated_memory(), 7);

        // Same length -> unchanged...
        lru.put("key".to_owned(), "abcd".to_owned());
        assert_eq!(lru.allocated_memory(), 7);
        assert_eq!(lru.len(), 1);

        // Longer value -> increased by exactly the delta...
        lru.put("key".to_owned(), "abcdef".to_owned());
        assert_eq!(lru.allocated_memory(), 9);
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn zero_budget_means_unbounded() {
        let mut lru = LRUCache::new(0);
        for i in 0..1000 {
            lru.put(format!("key-{}", i), "value".to_owned());
        }

        assert_eq!(lru.len(), 1000);
        assert_eq!(lru.evictions(), 0);
    }

    #[test]
    fn oversized_entries_empty_the_cache() {
        let mut lru = LRUCache::new(8);
        lru.put("A".to_owned(), "1".to_owned());
        lru.put("B".to_owned(), "much too large for this cache".to_owned());

        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn remove_oldest_on_empty_cache_is_a_noop() {
        let mut lru: LRUCache<String> = LRUCache::new(8);
        assert_eq!(lru.remove_oldest(), false);
        assert_eq!(lru.allocated_memory(), 0);
        assert_eq!(lru.evictions(), 0);
    }

    #[test]
    fn eviction_callback_sees_detached_entries() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();

        let mut lru = LRUCache::with_eviction_callback(
            10,
            Box::new(move |key: String, value: String| {
                log.lock().unwrap().push(format!("{}={}", key, value))
            }),
        );

        lru.put("k1".to_owned(), "v1".to_owned());
        lru.put("k2".to_owned(), "v2".to_owned());
        // Exceeds 10 bytes - "k1" has to go...
        lru.put("k3".to_owned(), "v3".to_owned());
        assert_eq!(evicted.lock().unwrap().as_slice(), &["k1=v1".to_owned()]);
        assert_eq!(lru.allocated_memory(), 8);

        // Overwrites don't notify the callback, explicit removals do...
        lru.put("k2".to_owned(), "v4".to_owned());
        assert!(lru.remove("k3"));
        assert_eq!(
            evicted.lock().unwrap().as_slice(),
            &["k1=v1".to_owned(), "k3=v3".to_owned()]
        );
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn metrics_are_computed_correctly() {
        let mut lru = LRUCache::new(10);

        // Write 3 values into the cache...
        lru.put("A".to_owned(), "A".to_owned());
        lru.put("B".to_owned(), "B".to_owned());
        lru.put("C".to_owned(), "C".to_owned());

        // Perform 4 reads, of which 3 hit a cache entry...
        assert!(lru.get("A").is_some());
        assert!(lru.get("B").is_some());
        assert!(lru.get("C").is_some());
        assert!(lru.get("D").is_none());

        assert_eq!(lru.writes(), 3);
        assert_eq!(lru.reads(), 4);
        assert_eq!(lru.hits(), 3);
        assert_eq!(lru.hit_rate().round() as i32, 75);

        // The cache contains 6 bytes of data and has a max memory of 10 -> 60% utilization..
        assert_eq!(lru.allocated_memory(), 6);
        assert_eq!(lru.memory_utilization().round() as i32, 60);

        // Flushing resets everything...
        lru.flush();
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.reads(), 0);
        assert_eq!(lru.allocated_memory(), 0);
    }
}
