//! Server initiated messages.
//!
//! RESP3 servers push out-of-band frames for pub/sub traffic and client-side
//! cache invalidation. The reader recognizes them by their depth-0 `>` kind
//! and routes them here instead of into any request destination; they are
//! delivered to the application in arrival order through
//! [`Connection::read_push`](crate::Connection::read_push).

use bytes::Bytes;

use crate::node::OwnedNode;

/// One materialized push frame.
///
/// The caller consumes push messages asynchronously, long after the read
/// buffer has moved on, so the nodes own their payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    /// The frame's nodes in traversal order, the `>` header first.
    pub nodes: Vec<OwnedNode>,
}

impl PushMessage {
    /// The frame's direct children, e.g. `["message", channel, payload]` for
    /// a pub/sub delivery.
    pub fn items(&self) -> impl Iterator<Item = &OwnedNode> {
        self.nodes.iter().filter(|node| node.depth == 1)
    }

    /// The payload of the n-th direct child, if it is a scalar.
    pub fn item(&self, index: usize) -> Option<&Bytes> {
        self.items().nth(index).map(|node| &node.value)
    }
}
