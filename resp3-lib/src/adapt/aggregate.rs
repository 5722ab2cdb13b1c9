//! Sinks for container destinations.
//!
//! Element boundaries are depth based: a node at depth 1 opens a new element
//! subtree, deeper nodes belong to the subtree in progress. This needs no
//! child counting, so streamed aggregates (whose declared size is unknown)
//! decode exactly like sized ones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use crate::node::{Node, OwnedNode};
use crate::{Error, Result};

use super::{FromResp3, NodeSink};

/// Keeps every node verbatim, in traversal order.
#[derive(Debug, Default)]
pub struct NodesSink {
    nodes: Vec<OwnedNode>,
}

impl NodesSink {
    pub(crate) fn into_nodes(self) -> Vec<OwnedNode> {
        self.nodes
    }
}

impl NodeSink for NodesSink {
    fn push(&mut self, node: &Node<'_>) -> Result<()> {
        self.nodes.push(node.to_owned());
        Ok(())
    }
}

/// Decodes a top level aggregate into a sequence of `T`s.
///
/// Under a map-shaped top (map or attribute) an element spans two sibling
/// subtrees, key then value, so `Vec<(K, V)>` consumes pairs.
pub struct SeqSink<T: FromResp3> {
    items: Vec<T>,
    current: Option<T::Sink>,
    /// Depth-1 subtrees already fed to the current element.
    subtrees: usize,
    /// Subtrees per element, 2 under a map-shaped top.
    group: usize,
    started: bool,
}

impl<T: FromResp3> Default for SeqSink<T> {
    fn default() -> Self {
        SeqSink {
            items: Vec::new(),
            current: None,
            subtrees: 0,
            group: 1,
            started: false,
        }
    }
}

impl<T: FromResp3> SeqSink<T> {
    fn close_current(&mut self) -> Result<()> {
        if let Some(sink) = self.current.take() {
            self.items.push(T::finish(sink)?);
        }
        Ok(())
    }

    fn into_items(mut self) -> Result<Vec<T>> {
        self.close_current()?;
        Ok(self.items)
    }
}

impl<T: FromResp3> NodeSink for SeqSink<T> {
    fn push(&mut self, node: &Node<'_>) -> Result<()> {
        match node.depth {
            0 => {
                if self.started {
                    return Err(Error::IncompatibleSize);
                }
                if !node.kind.is_aggregate() {
                    return Err(Error::ExpectsAggregate);
                }
                self.group = node.kind.multiplicity();
                self.started = true;
                Ok(())
            }
            1 => {
                if let Some(sink) = self.current.as_mut() {
                    if self.subtrees < self.group {
                        self.subtrees += 1;
                        return sink.push(&node.with_depth(0));
                    }
                }
                self.close_current()?;
                let mut sink = T::Sink::default();
                if self.group > 1 {
                    sink.expect_responses(self.group);
                }
                sink.push(&node.with_depth(0))?;
                self.current = Some(sink);
                self.subtrees = 1;
                Ok(())
            }
            depth => {
                let sink = self
                    .current
                    .as_mut()
                    .ok_or_else(|| Error::Parse("element node without an element".into()))?;
                sink.push(&node.with_depth(depth - 1))
            }
        }
    }
}

impl<T: FromResp3> FromResp3 for Vec<T> {
    type Sink = SeqSink<T>;

    fn finish(sink: SeqSink<T>) -> Result<Vec<T>> {
        sink.into_items()
    }
}

impl<T: FromResp3 + Eq + Hash> FromResp3 for HashSet<T> {
    type Sink = SeqSink<T>;

    fn finish(sink: SeqSink<T>) -> Result<HashSet<T>> {
        Ok(sink.into_items()?.into_iter().collect())
    }
}

/// Alternating key and value subtrees of one in-flight pair.
enum PairState<K: FromResp3, V: FromResp3> {
    Key(K::Sink),
    Value(K, V::Sink),
}

/// Decodes a map-shaped aggregate pairwise.
///
/// Accepts maps and attributes (interleaved children) as well as arrays and
/// sets carrying an even number of children.
pub struct MapSink<K: FromResp3, V: FromResp3> {
    pairs: Vec<(K, V)>,
    pending: Option<PairState<K, V>>,
    started: bool,
}

impl<K: FromResp3, V: FromResp3> Default for MapSink<K, V> {
    fn default() -> Self {
        MapSink {
            pairs: Vec::new(),
            pending: None,
            started: false,
        }
    }
}

impl<K: FromResp3, V: FromResp3> MapSink<K, V> {
    fn into_pairs(mut self) -> Result<Vec<(K, V)>> {
        match self.pending.take() {
            None => Ok(self.pairs),
            Some(PairState::Value(key, sink)) => {
                self.pairs.push((key, V::finish(sink)?));
                Ok(self.pairs)
            }
            // A key without its value means the child count was odd.
            Some(PairState::Key(_)) => Err(Error::IncompatibleSize),
        }
    }
}

impl<K: FromResp3, V: FromResp3> NodeSink for MapSink<K, V> {
    fn push(&mut self, node: &Node<'_>) -> Result<()> {
        match node.depth {
            0 => {
                if self.started {
                    return Err(Error::IncompatibleSize);
                }
                if !node.kind.is_aggregate() {
                    return Err(Error::ExpectsAggregate);
                }
                self.started = true;
                Ok(())
            }
            1 => {
                self.pending = Some(match self.pending.take() {
                    None => {
                        let mut sink = K::Sink::default();
                        sink.push(&node.with_depth(0))?;
                        PairState::Key(sink)
                    }
                    Some(PairState::Key(sink)) => {
                        let key = K::finish(sink)?;
                        let mut value = V::Sink::default();
                        value.push(&node.with_depth(0))?;
                        PairState::Value(key, value)
                    }
                    Some(PairState::Value(key, sink)) => {
                        self.pairs.push((key, V::finish(sink)?));
                        let mut next = K::Sink::default();
                        next.push(&node.with_depth(0))?;
                        PairState::Key(next)
                    }
                });
                Ok(())
            }
            depth => {
                let shifted = node.with_depth(depth - 1);
                match self.pending.as_mut() {
                    Some(PairState::Key(sink)) => sink.push(&shifted),
                    Some(PairState::Value(_, sink)) => sink.push(&shifted),
                    None => Err(Error::Parse("pair node without a pair".into())),
                }
            }
        }
    }
}

impl<K, V> FromResp3 for HashMap<K, V>
where
    K: FromResp3 + Eq + Hash,
    V: FromResp3,
{
    type Sink = MapSink<K, V>;

    fn finish(sink: MapSink<K, V>) -> Result<HashMap<K, V>> {
        Ok(sink.into_pairs()?.into_iter().collect())
    }
}

impl<K, V> FromResp3 for BTreeMap<K, V>
where
    K: FromResp3 + Ord,
    V: FromResp3,
{
    type Sink = MapSink<K, V>;

    fn finish(sink: MapSink<K, V>) -> Result<BTreeMap<K, V>> {
        Ok(sink.into_pairs()?.into_iter().collect())
    }
}
