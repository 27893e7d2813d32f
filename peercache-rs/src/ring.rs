//! Provides a consistent hash ring which maps keys to nodes.
//!
//! Each node is placed on the ring several times (once per **replica**). The position of a
//! replica is the hash of the replica index followed by the node name (e.g. "0http://host:8001").
//! A key is owned by the node of the first position which is greater than or equal to the hash of
//! the key. If no such position exists, we wrap around and use the very first position of the
//! ring.
//!
//! Using virtual replicas keeps the load distribution fairly even, even if only a few nodes are
//! present.
//!
//! # Examples
//! ```
//! # use peercache::ring::HashRing;
//! let mut ring = HashRing::new(50, None);
//! ring.add(&["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//!
//! let node = ring.get("Tom").unwrap();
//! assert_eq!(ring.get("Tom"), Some(node));
//! ```
use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Describes a hash function which maps arbitrary data onto a ring position.
pub type Hash = fn(&[u8]) -> u32;

/// Computes the SHA-256 digest of the given data and uses its first four bytes as position.
///
/// This is the hash function used by a [HashRing] unless another one is specified. Short and
/// similar inputs like "0node" and "1node" still end up on unrelated positions.
pub fn sha256_hash(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);

    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Maps keys onto a set of nodes using consistent hashing.
///
/// Note that a ring doesn't support removing nodes. If the set of nodes changes, a new ring has
/// to be built.
pub struct HashRing {
    hash: Hash,
    replicas: usize,
    positions: Vec<u32>,
    owners: HashMap<u32, String>,
    nodes: Vec<String>,
}

impl HashRing {
    /// Creates a new and empty ring which places each node **replicas** times.
    ///
    /// If no hash function is given, [sha256_hash] is used.
    pub fn new(replicas: usize, hash: Option<Hash>) -> Self {
        HashRing {
            hash: hash.unwrap_or(sha256_hash),
            replicas,
            positions: Vec::new(),
            owners: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    /// Adds the given nodes to the ring.
    ///
    /// Nodes which are already known are skipped, so that adding a node twice doesn't place
    /// duplicate positions onto the ring. If two replicas happen to hash to the same position,
    /// the one added last wins.
    pub fn add<S: AsRef<str>>(&mut self, nodes: &[S]) {
        for node in nodes {
            let node = node.as_ref();
            if self.nodes.iter().any(|known| known == node) {
                log::debug!("Node {} is already present in the hash ring. Skipping.", node);
                continue;
            }

            for replica in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", replica, node).as_bytes());
                self.positions.push(position);
                let _ = self.owners.insert(position, node.to_owned());
            }
            self.nodes.push(node.to_owned());
        }

        self.positions.sort_unstable();
    }

    /// Returns the node which owns the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.positions.partition_point(|position| *position < hash);
        let position = self.positions[index % self.positions.len()];

        self.owners.get(&position).map(|node| node.as_str())
    }

    /// Returns all nodes in the order in which they were added.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Returns the number of positions on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Determines if no node has been added yet.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the number of replicas placed per node.
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}
