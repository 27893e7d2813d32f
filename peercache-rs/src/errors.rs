//! Defines the errors which are reported by a [Group](crate::group::Group).
//!
//! The error has to be **Clone**, as a single failed load is handed to every caller which waited
//! for it (see [Flight](crate::flight::Flight)). Therefore underlying errors are kept in an **Arc**.
use std::sync::Arc;

use thiserror::Error;

/// Enumerates the errors reported when reading from a group.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The caller passed an invalid argument (e.g. an empty key).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The loader of the group failed to provide a value.
    #[error("{0}")]
    UpstreamLoadFailure(Arc<anyhow::Error>),

    /// The peer which owns a key couldn't provide the value.
    ///
    /// This is never reported to the caller of a group, as we fall back to loading the value
    /// locally. It is still modelled as error so that it can be logged properly.
    #[error("Failed to fetch from peer {peer}: {cause}")]
    PeerUnavailable {
        /// Contains the address of the peer.
        peer: String,
        /// Contains the underlying failure.
        cause: Arc<anyhow::Error>,
    },

    /// A component has been set up incorrectly.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Wraps the error of a loader.
    pub fn upstream(error: anyhow::Error) -> Self {
        CacheError::UpstreamLoadFailure(Arc::new(error))
    }

    /// Wraps the error of a peer request.
    pub fn peer(peer: impl Into<String>, error: anyhow::Error) -> Self {
        CacheError::PeerUnavailable {
            peer: peer.into(),
            cause: Arc::new(error),
        }
    }
}
