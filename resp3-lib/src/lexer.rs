//! Streaming RESP3 lexer.
//!
//! [`Lexer::step`] frames the bytes at the front of the caller's read buffer
//! into one [`Node`] at a time. The aggregate stack survives across calls, so
//! the byte stream may be split at any boundary: an incomplete token simply
//! reports [`Step::Incomplete`] and is re-scanned once more bytes arrive.
//!
//! The lexer never allocates per value. Payloads are slices into the scan
//! buffer; the caller advances its buffer by the consumed length after the
//! node has been handled.

use crate::node::{AggregateSize, Kind, Node};
use crate::{Error, Result};

const CRLF: &[u8] = b"\r\n";

/// Outcome of scanning the front of the buffer.
#[derive(Debug)]
pub enum Step<'a> {
    /// The buffer ends mid token; read more bytes and call again.
    Incomplete,
    /// One node was framed, consuming this many bytes.
    Node(Node<'a>, usize),
    /// A streamed-value terminator was consumed; no node is produced.
    Skip(usize),
}

/// One pending aggregate on the nesting stack.
#[derive(Debug)]
enum Level {
    /// Sized aggregate with this many children left (maps count twice).
    Sized(usize),
    /// Streamed aggregate, runs until the `.` sentinel.
    Streamed,
    /// Streamed string, `;<len>` chunks until the `;0` sentinel.
    Chunks,
}

/// Resumable byte-to-node transducer.
#[derive(Debug, Default)]
pub struct Lexer {
    stack: Vec<Level>,
}

impl Lexer {
    pub fn new() -> Lexer {
        Lexer { stack: Vec::new() }
    }

    /// True exactly between top level responses.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Discards all nesting state, e.g. when the transport is replaced.
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Scans the next token at the start of `buf`.
    ///
    /// Nothing is consumed on [`Step::Incomplete`]; otherwise the caller must
    /// advance its buffer by the reported length once it is done with the
    /// node, since the node's payload borrows `buf`.
    pub fn step<'a>(&mut self, buf: &'a [u8]) -> Result<Step<'a>> {
        if buf.is_empty() {
            return Ok(Step::Incomplete);
        }

        // Inside a streamed string only chunk tokens are legal.
        if matches!(self.stack.last(), Some(Level::Chunks)) {
            return self.chunk(buf);
        }

        if buf[0] == b'.' {
            return self.end_sentinel(buf);
        }

        let depth = self.stack.len();
        let kind = Kind::from_marker(buf[0])
            .ok_or_else(|| Error::Parse(format!("invalid type marker {:#04x}", buf[0])))?;
        let Some((line, after_line)) = line(&buf[1..]) else {
            return Ok(Step::Incomplete);
        };
        let consumed = 1 + after_line;

        match kind {
            // Scalar payloads live on the marker line itself.
            Kind::SimpleString
            | Kind::SimpleError
            | Kind::Number
            | Kind::Double
            | Kind::Boolean
            | Kind::BigNumber
            | Kind::Null => {
                self.complete_value();
                Ok(Step::Node(scalar(kind, depth, line), consumed))
            }
            Kind::BlobString | Kind::BlobError | Kind::VerbatimString => {
                self.blob(kind, depth, line, consumed, buf)
            }
            Kind::Array | Kind::Map | Kind::Set | Kind::Attribute | Kind::Push => {
                self.aggregate(kind, depth, line, consumed)
            }
            Kind::StreamedString => unreachable!("not a marker kind"),
        }
    }

    /// Length-prefixed payload: `$<len>\r\n<bytes>\r\n`. A `?` length starts
    /// a streamed string, `-1` is the RESP2 null.
    fn blob<'a>(
        &mut self,
        kind: Kind,
        depth: usize,
        line: &[u8],
        header: usize,
        buf: &'a [u8],
    ) -> Result<Step<'a>> {
        if line == b"?" {
            if kind != Kind::BlobString {
                return Err(Error::Parse("only blob strings may be streamed".into()));
            }
            self.stack.push(Level::Chunks);
            let node = Node {
                kind: Kind::StreamedString,
                depth,
                aggregate_size: AggregateSize::Streamed,
                value: b"",
            };
            return Ok(Step::Node(node, header));
        }

        let len = signed(line)?;
        if len == -1 {
            self.complete_value();
            return Ok(Step::Node(scalar(Kind::Null, depth, b""), header));
        }
        let len = usize::try_from(len).map_err(|_| Error::Parse("negative blob length".into()))?;

        let total = header + len + CRLF.len();
        if buf.len() < total {
            return Ok(Step::Incomplete);
        }
        if &buf[header + len..total] != CRLF {
            return Err(Error::Parse("blob payload not terminated by CRLF".into()));
        }

        self.complete_value();
        let node = Node {
            kind,
            depth,
            aggregate_size: AggregateSize::Count(1),
            value: &buf[header..header + len],
        };
        Ok(Step::Node(node, total))
    }

    /// Aggregate header: `*<count>\r\n`. A `?` count starts a streamed
    /// aggregate, `-1` is the RESP2 null array.
    fn aggregate<'a>(
        &mut self,
        kind: Kind,
        depth: usize,
        line: &[u8],
        consumed: usize,
    ) -> Result<Step<'a>> {
        if line == b"?" {
            self.stack.push(Level::Streamed);
            let node = Node {
                kind,
                depth,
                aggregate_size: AggregateSize::Streamed,
                value: b"",
            };
            return Ok(Step::Node(node, consumed));
        }

        let count = signed(line)?;
        if count == -1 {
            self.complete_value();
            return Ok(Step::Node(scalar(Kind::Null, depth, b""), consumed));
        }
        let count =
            usize::try_from(count).map_err(|_| Error::Parse("negative aggregate size".into()))?;

        if count == 0 {
            self.complete_value();
        } else {
            self.stack.push(Level::Sized(count * kind.multiplicity()));
        }
        let node = Node {
            kind,
            depth,
            aggregate_size: AggregateSize::Count(count),
            value: b"",
        };
        Ok(Step::Node(node, consumed))
    }

    /// Streamed string chunk: `;<len>\r\n<bytes>\r\n`; `;0\r\n` terminates.
    fn chunk<'a>(&mut self, buf: &'a [u8]) -> Result<Step<'a>> {
        if buf[0] != b';' {
            return Err(Error::Parse("expected a streamed string chunk".into()));
        }
        let Some((line, after_line)) = line(&buf[1..]) else {
            return Ok(Step::Incomplete);
        };
        let header = 1 + after_line;

        let len: usize =
            atoi::atoi(line).ok_or_else(|| Error::Parse("invalid chunk length".into()))?;
        if len == 0 {
            self.stack.pop();
            self.complete_value();
            return Ok(Step::Skip(header));
        }

        let total = header + len + CRLF.len();
        if buf.len() < total {
            return Ok(Step::Incomplete);
        }
        if &buf[header + len..total] != CRLF {
            return Err(Error::Parse("chunk payload not terminated by CRLF".into()));
        }

        let node = Node {
            kind: Kind::BlobString,
            depth: self.stack.len(),
            aggregate_size: AggregateSize::Count(1),
            value: &buf[header..header + len],
        };
        Ok(Step::Node(node, total))
    }

    /// Streamed aggregate terminator: `.\r\n`.
    fn end_sentinel<'a>(&mut self, buf: &'a [u8]) -> Result<Step<'a>> {
        if !matches!(self.stack.last(), Some(Level::Streamed)) {
            return Err(Error::Parse("unexpected stream end marker".into()));
        }
        if buf.len() < 3 {
            return Ok(Step::Incomplete);
        }
        if &buf[1..3] != CRLF {
            return Err(Error::Parse("malformed stream end marker".into()));
        }
        self.stack.pop();
        self.complete_value();
        Ok(Step::Skip(3))
    }

    /// Books one completed value against the enclosing aggregates, popping
    /// every aggregate this completion finishes in turn.
    fn complete_value(&mut self) {
        while let Some(level) = self.stack.last_mut() {
            match level {
                Level::Sized(remaining) => {
                    *remaining -= 1;
                    if *remaining > 0 {
                        return;
                    }
                    self.stack.pop();
                }
                // Unknown length; only the sentinel pops these.
                Level::Streamed | Level::Chunks => return,
            }
        }
    }
}

/// The bytes up to the next CRLF, plus the offset just past it.
fn line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(2)
        .position(|window| window == CRLF)
        .map(|at| (&buf[..at], at + CRLF.len()))
}

fn signed(line: &[u8]) -> Result<i64> {
    atoi::atoi(line).ok_or_else(|| Error::Parse("invalid length token".into()))
}

fn scalar<'a>(kind: Kind, depth: usize, value: &'a [u8]) -> Node<'a> {
    Node {
        kind,
        depth,
        aggregate_size: AggregateSize::Count(1),
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs the whole input through the lexer, returning owned copies.
    fn lex(input: &[u8]) -> Vec<(Kind, usize, AggregateSize, Vec<u8>)> {
        let mut lexer = Lexer::new();
        let mut nodes = Vec::new();
        let mut pos = 0;
        while pos < input.len() {
            match lexer.step(&input[pos..]).unwrap() {
                Step::Incomplete => panic!("truncated input"),
                Step::Skip(n) => pos += n,
                Step::Node(node, n) => {
                    nodes.push((node.kind, node.depth, node.aggregate_size, node.value.to_vec()));
                    pos += n;
                }
            }
        }
        assert!(lexer.is_idle());
        nodes
    }

    #[test]
    fn scalar_tokens() {
        let nodes = lex(b"+PONG\r\n");
        assert_eq!(
            nodes,
            vec![(Kind::SimpleString, 0, AggregateSize::Count(1), b"PONG".to_vec())]
        );

        let nodes = lex(b":-42\r\n");
        assert_eq!(nodes[0].0, Kind::Number);
        assert_eq!(nodes[0].3, b"-42");
    }

    #[test]
    fn null_variants() {
        for input in [&b"_\r\n"[..], b"$-1\r\n", b"*-1\r\n"] {
            let nodes = lex(input);
            assert_eq!(nodes.len(), 1);
            assert_eq!(nodes[0].0, Kind::Null);
        }
    }

    #[test]
    fn array_with_null_element() {
        let nodes = lex(b"*3\r\n$2\r\nv1\r\n$-1\r\n$2\r\nv3\r\n");
        let kinds: Vec<(Kind, usize)> = nodes.iter().map(|n| (n.0, n.1)).collect();
        assert_eq!(
            kinds,
            vec![
                (Kind::Array, 0),
                (Kind::BlobString, 1),
                (Kind::Null, 1),
                (Kind::BlobString, 1),
            ]
        );
    }

    #[test]
    fn map_expands_to_pairs() {
        let nodes = lex(b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n");
        assert_eq!(nodes[0].2, AggregateSize::Count(2));
        assert_eq!(nodes.len(), 5);
        assert!(nodes[1..].iter().all(|n| n.1 == 1));
    }

    #[test]
    fn nested_aggregates_pop_in_cascade() {
        let nodes = lex(b"*2\r\n*1\r\n:5\r\n+ok\r\n");
        let depths: Vec<usize> = nodes.iter().map(|n| n.1).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
    }

    #[test]
    fn streamed_string_chunks() {
        let nodes = lex(b"$?\r\n;4\r\nHell\r\n;5\r\no wor\r\n;2\r\nld\r\n;0\r\n");
        assert_eq!(nodes[0].0, Kind::StreamedString);
        assert_eq!(nodes[0].2, AggregateSize::Streamed);
        let chunks: Vec<&[u8]> = nodes[1..].iter().map(|n| n.3.as_slice()).collect();
        assert_eq!(chunks, vec![&b"Hell"[..], b"o wor", b"ld"]);
    }

    #[test]
    fn streamed_aggregate_until_sentinel() {
        let nodes = lex(b"*?\r\n:1\r\n:2\r\n.\r\n");
        assert_eq!(nodes[0].0, Kind::Array);
        assert_eq!(nodes[0].2, AggregateSize::Streamed);
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn incomplete_reports_and_resumes() {
        let input = b"$5\r\nhello\r\n";
        let mut lexer = Lexer::new();
        assert!(matches!(lexer.step(&input[..6]).unwrap(), Step::Incomplete));
        match lexer.step(&input[..]).unwrap() {
            Step::Node(node, n) => {
                assert_eq!(node.value, b"hello");
                assert_eq!(n, input.len());
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn invalid_marker_is_a_parse_error() {
        let mut lexer = Lexer::new();
        assert!(matches!(
            lexer.step(b"@oops\r\n"),
            Err(crate::Error::Parse(_))
        ));
    }

    #[test]
    fn split_at_every_boundary_yields_the_same_nodes() {
        let input = b"*2\r\n%1\r\n+k\r\n$3\r\nval\r\n~2\r\n:1\r\n:2\r\n";
        let whole = lex(input);

        for split in 1..input.len() {
            let mut lexer = Lexer::new();
            let mut nodes = Vec::new();
            let mut buf = Vec::new();
            for half in [&input[..split], &input[split..]] {
                buf.extend_from_slice(half);
                loop {
                    match lexer.step(&buf[..]).unwrap() {
                        Step::Incomplete => break,
                        Step::Skip(n) => {
                            buf.drain(..n);
                        }
                        Step::Node(node, n) => {
                            nodes.push((
                                node.kind,
                                node.depth,
                                node.aggregate_size,
                                node.value.to_vec(),
                            ));
                            buf.drain(..n);
                        }
                    }
                }
            }
            assert_eq!(nodes, whole, "split at {split}");
        }
    }
}
