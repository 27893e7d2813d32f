//! Defines the interfaces used by a [Group](crate::group::Group) to talk to other peers.
//!
//! A [PeerPicker] determines which peer owns a given key (most probably using a
//! [HashRing](crate::ring::HashRing)). If the key is owned by another peer, the picker returns a
//! [PeerGetter] which can fetch the value from there. If the key is owned by the local node,
//! **None** is returned and the group computes the value itself.
//!
//! The [HttpPool](crate::pool::HttpPool) provides the HTTP based implementation of both traits.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Describes a request sent to the peer which owns a key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Contains the name of the group to read from.
    pub group: String,
    /// Contains the key to fetch.
    pub key: String,
}

/// Contains the response of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Contains the raw value as provided by the owning peer.
    pub value: Vec<u8>,
}

/// Selects the peer which owns a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter for the peer owning the given key.
    ///
    /// Returns **None** if there are no peers or if the key is owned by the local node.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from a remote peer.
#[async_trait::async_trait]
pub trait PeerGetter: Send + Sync {
    /// Returns the address of the peer (used for logging).
    fn address(&self) -> &str;

    /// Asks the peer for the value of the given group and key.
    async fn get(&self, request: &Request) -> anyhow::Result<Response>;
}
