//! Provides the immutable value type which is stored in caches and transferred between peers.
//!
//! A [ByteView] is created once (either from the result of a loader or from the response of a
//! peer) and never changes afterwards. Cloning a view is cheap as the underlying buffer is shared,
//! but whenever the raw bytes are handed out as an owned buffer, a copy is made so that no caller
//! can ever tamper with the contents of a cache.
//!
//! # Examples
//! ```
//! # use peercache::byteview::ByteView;
//! let view = ByteView::from("630");
//!
//! assert_eq!(view.len(), 3);
//! assert_eq!(view.to_string(), "630");
//!
//! // Modifying the copy leaves the view untouched...
//! let mut copy = view.byte_slice();
//! copy[0] = b'9';
//! assert_eq!(view.to_string(), "630");
//! ```
use std::fmt;
use std::fmt::Display;

use bytes::Bytes;

use crate::lru::ByteSize;

/// Wraps an immutable sequence of bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Creates a new view by copying the given data.
    pub fn copy_from(data: &[u8]) -> Self {
        ByteView {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Determines if this view contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns an independent copy of the underlying data.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Returns a shared handle to the underlying buffer.
    ///
    /// As **Bytes** is itself immutable, this is safe to hand out without copying. This is used
    /// to stream a value into an HTTP response body.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

impl From<Vec<u8>> for ByteView {
    /// Takes ownership of the given buffer. As nobody else can reference it anymore, no copy is
    /// required.
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            bytes: Bytes::from(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from(data.as_bytes())
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.bytes.len()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
