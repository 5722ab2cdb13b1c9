//! Type-directed response adapters.
//!
//! A destination type picks its decoding strategy through [`FromResp3`]: the
//! connection builds the destination's [`NodeSink`], feeds it the lexer's
//! node stream, and finishes it into the typed value once the response is
//! complete. No intermediate generic tree is ever materialized; a scalar
//! destination copies exactly one payload, a `Vec` one payload per element.
//!
//! | Destination | Accepts |
//! |---|---|
//! | `()` | anything, discarded |
//! | `i64` `u64` `f64` `bool` `String` `Bytes` | one scalar node |
//! | `Option<T>` | `T`'s input, or a null |
//! | `Vec<T>` | an aggregate, one element subtree per `T` |
//! | `HashMap<K, V>` | a map-shaped aggregate, pairwise |
//! | [`NodeTree`] | anything, kept verbatim |
//! | `(T1, ..., Tn)` | pipelined responses or one sized aggregate |

mod aggregate;
mod tuple;

use crate::node::{AggregateSize, Kind, Node, NodeTree};
use crate::{Error, Lexer, Result, Step};

pub use aggregate::{MapSink, NodesSink, SeqSink};
pub use tuple::{
    Tuple1Sink, Tuple2Sink, Tuple3Sink, Tuple4Sink, Tuple5Sink, Tuple6Sink, Tuple7Sink,
    Tuple8Sink,
};

use bytes::Bytes;

/// A sink consuming lexer nodes into some typed destination.
///
/// The trait is object safe so the connection can drive responses without
/// knowing the destination type.
pub trait NodeSink: Send {
    /// Consumes one node. The node's payload is only valid for this call.
    fn push(&mut self, node: &Node<'_>) -> Result<()>;

    /// Called once before any node with the total number of top level
    /// responses the request expects. Most sinks do not care; tuple sinks use
    /// it to switch between pipelined and single-aggregate decoding.
    fn expect_responses(&mut self, _responses: usize) {}
}

/// A type that can be decoded from a RESP3 response.
pub trait FromResp3: Sized + Send + 'static {
    type Sink: NodeSink + Default + Send + 'static;

    /// Finishes the sink into the destination value.
    fn finish(sink: Self::Sink) -> Result<Self>;
}

/// Decodes one complete response from `buf` into `T`.
///
/// This is the standalone entry into the adapter framework, mostly useful
/// for tests and tooling; the connection drives the same machinery
/// incrementally.
pub fn decode<T: FromResp3>(buf: &[u8]) -> Result<T> {
    decode_n(buf, 1)
}

/// Decodes `responses` consecutive complete responses from `buf` into one
/// destination, the way a pipelined request does.
pub fn decode_n<T: FromResp3>(buf: &[u8], responses: usize) -> Result<T> {
    let mut lexer = Lexer::new();
    let mut sink = T::Sink::default();
    sink.expect_responses(responses);

    let mut pos = 0;
    let mut seen = 0;
    while seen < responses {
        match lexer.step(&buf[pos..])? {
            Step::Incomplete => return Err(Error::Parse("truncated response".into())),
            Step::Skip(n) => pos += n,
            Step::Node(node, n) => {
                sink.push(&node)?;
                pos += n;
            }
        }
        if lexer.is_idle() {
            seen += 1;
        }
    }
    T::finish(sink)
}

/// Discards every node of one response. The destination of `()` and of the
/// keepalive's internal pings.
#[derive(Debug, Default)]
pub struct IgnoreSink;

impl NodeSink for IgnoreSink {
    fn push(&mut self, _node: &Node<'_>) -> Result<()> {
        Ok(())
    }
}

impl FromResp3 for () {
    type Sink = IgnoreSink;

    fn finish(_sink: IgnoreSink) -> Result<()> {
        Ok(())
    }
}

/// A value parsed out of a single non-aggregate node.
pub trait FromScalar: Sized + Send + 'static {
    fn from_scalar(node: &Node<'_>) -> Result<Self>;
}

/// The scalar payload of a node, with error replies surfaced as
/// [`Error::Server`] and verbatim prefixes stripped.
fn scalar_bytes<'a>(node: &Node<'a>) -> Result<&'a [u8]> {
    match node.kind {
        Kind::SimpleError | Kind::BlobError => {
            Err(Error::Server(String::from_utf8_lossy(node.value).into_owned()))
        }
        // `txt:` / `mkd:` format prefix.
        Kind::VerbatimString if node.value.len() >= 4 => Ok(&node.value[4..]),
        Kind::Null => Err(Error::ExpectsScalar),
        // A streamed header has no payload of its own; the sink collects
        // its chunks instead.
        Kind::StreamedString => Err(Error::ExpectsScalar),
        kind if kind.is_aggregate() => Err(Error::ExpectsScalar),
        _ => Ok(node.value),
    }
}

impl FromScalar for i64 {
    fn from_scalar(node: &Node<'_>) -> Result<i64> {
        atoi::atoi(scalar_bytes(node)?).ok_or_else(|| Error::Parse("invalid integer".into()))
    }
}

impl FromScalar for u64 {
    fn from_scalar(node: &Node<'_>) -> Result<u64> {
        atoi::atoi(scalar_bytes(node)?).ok_or_else(|| Error::Parse("invalid integer".into()))
    }
}

impl FromScalar for f64 {
    fn from_scalar(node: &Node<'_>) -> Result<f64> {
        match scalar_bytes(node)? {
            b"inf" => Ok(f64::INFINITY),
            b"-inf" => Ok(f64::NEG_INFINITY),
            b"nan" => Ok(f64::NAN),
            bytes => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Parse("invalid double".into())),
        }
    }
}

impl FromScalar for bool {
    fn from_scalar(node: &Node<'_>) -> Result<bool> {
        match scalar_bytes(node)? {
            b"t" | b"1" => Ok(true),
            b"f" | b"0" => Ok(false),
            _ => Err(Error::Parse("invalid boolean".into())),
        }
    }
}

impl FromScalar for String {
    fn from_scalar(node: &Node<'_>) -> Result<String> {
        String::from_utf8(scalar_bytes(node)?.to_vec())
            .map_err(|_| Error::Parse("invalid utf-8 in string payload".into()))
    }
}

impl FromScalar for Bytes {
    fn from_scalar(node: &Node<'_>) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(scalar_bytes(node)?))
    }
}

/// Accepts exactly one scalar value at depth 0.
///
/// A streamed string counts as one scalar: its chunks are concatenated and
/// parsed at finish time.
#[derive(Debug)]
pub struct ScalarSink<T> {
    value: Option<T>,
    chunks: Option<Vec<u8>>,
}

impl<T> Default for ScalarSink<T> {
    fn default() -> Self {
        ScalarSink {
            value: None,
            chunks: None,
        }
    }
}

impl<T: FromScalar> ScalarSink<T> {
    fn busy(&self) -> bool {
        self.value.is_some() || self.chunks.is_some()
    }

    fn finish_value(self) -> Result<T> {
        if let Some(chunks) = self.chunks {
            let node = Node {
                kind: Kind::BlobString,
                depth: 0,
                aggregate_size: AggregateSize::Count(1),
                value: &chunks,
            };
            return T::from_scalar(&node);
        }
        self.value.ok_or(Error::ExpectsScalar)
    }
}

impl<T: FromScalar> NodeSink for ScalarSink<T> {
    fn push(&mut self, node: &Node<'_>) -> Result<()> {
        match node.depth {
            0 if node.kind == Kind::StreamedString => {
                if self.busy() {
                    return Err(Error::ExpectsScalar);
                }
                self.chunks = Some(Vec::new());
                Ok(())
            }
            0 => {
                if self.busy() {
                    return Err(Error::ExpectsScalar);
                }
                self.value = Some(T::from_scalar(node)?);
                Ok(())
            }
            1 if self.chunks.is_some() => {
                self.chunks
                    .as_mut()
                    .expect("checked above")
                    .extend_from_slice(node.value);
                Ok(())
            }
            _ => Err(Error::ExpectsScalar),
        }
    }
}

macro_rules! scalar_from_resp3 {
    ($($ty:ty),+) => {
        $(
            impl FromResp3 for $ty {
                type Sink = ScalarSink<$ty>;

                fn finish(sink: ScalarSink<$ty>) -> Result<$ty> {
                    sink.finish_value()
                }
            }
        )+
    };
}

scalar_from_resp3!(i64, u64, f64, bool, String, Bytes);

/// Null-accepting wrapper: a null node at the top yields `None`, anything
/// else decodes as `T`.
pub struct OptionSink<T: FromResp3> {
    inner: T::Sink,
    seen: bool,
    null: bool,
}

impl<T: FromResp3> Default for OptionSink<T> {
    fn default() -> Self {
        OptionSink {
            inner: T::Sink::default(),
            seen: false,
            null: false,
        }
    }
}

impl<T: FromResp3> NodeSink for OptionSink<T> {
    fn push(&mut self, node: &Node<'_>) -> Result<()> {
        if !self.seen && node.depth == 0 && node.kind == Kind::Null {
            self.seen = true;
            self.null = true;
            return Ok(());
        }
        self.seen = true;
        self.inner.push(node)
    }

    fn expect_responses(&mut self, responses: usize) {
        self.inner.expect_responses(responses);
    }
}

impl<T: FromResp3> FromResp3 for Option<T> {
    type Sink = OptionSink<T>;

    fn finish(sink: OptionSink<T>) -> Result<Option<T>> {
        if !sink.seen || sink.null {
            return Ok(None);
        }
        T::finish(sink.inner).map(Some)
    }
}

impl FromResp3 for NodeTree {
    type Sink = NodesSink;

    fn finish(sink: NodesSink) -> Result<NodeTree> {
        Ok(NodeTree {
            nodes: sink.into_nodes(),
        })
    }
}
