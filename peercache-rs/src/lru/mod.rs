//! Provides a memory constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry once it is about to grow beyond its memory
//! limit. The footprint of an entry is the length of its key plus the size of its value as
//! reported by the [ByteSize] trait. Therefore the cache can store all kinds of values as long as
//! they can tell how large they are.
//!
//! The cache itself isn't synchronized. Each [Group](crate::group::Group) wraps its cache in a
//! mutex which is held only for the duration of a single operation.
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LRUCache;
