//! Request encoding.
//!
//! A [`Request`] is an append-only pipeline of commands, serialized up front
//! into one RESP3 buffer of inline arrays of bulk strings. Alongside the
//! bytes it records, per command, the tag and how many top level responses
//! the command elicits; subscribe-class commands elicit none, their
//! acknowledgements arrive as push frames.

use bytes::{BufMut, Bytes, BytesMut};

/// Per-request behavior knobs.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Whether losing the connection fails this request. When `false` the
    /// request survives in the queue and is retransmitted by the next `run`.
    pub cancel_on_connection_lost: bool,
}

impl Default for RequestConfig {
    fn default() -> RequestConfig {
        RequestConfig {
            cancel_on_connection_lost: true,
        }
    }
}

/// One encoded command: its uppercased tag and the number of top level
/// responses it elicits.
#[derive(Debug, Clone)]
pub struct Command {
    tag: Bytes,
    responses: u32,
}

impl Command {
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn responses(&self) -> u32 {
        self.responses
    }
}

/// An ordered pipeline of commands plus its serialized bytes.
#[derive(Debug, Default)]
pub struct Request {
    buf: BytesMut,
    commands: Vec<Command>,
    config: RequestConfig,
}

impl Request {
    pub fn new() -> Request {
        Request::with_config(RequestConfig::default())
    }

    pub fn with_config(config: RequestConfig) -> Request {
        Request {
            buf: BytesMut::new(),
            commands: Vec::new(),
            config,
        }
    }

    /// Appends one command. Commands are never reordered.
    pub fn push<S: AsRef<[u8]>>(&mut self, name: &str, args: &[S]) -> &mut Request {
        self.buf.put_u8(b'*');
        self.decimal(1 + args.len());
        self.bulk(name.as_bytes());
        for arg in args {
            self.bulk(arg.as_ref());
        }

        let tag = Bytes::from(name.to_ascii_uppercase().into_bytes());
        let responses = u32::from(!has_push_response(&tag));
        self.commands.push(Command { tag, responses });
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Total top level responses the server will send for this request.
    pub fn expected_responses(&self) -> u32 {
        self.commands.iter().map(Command::responses).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub(crate) fn into_parts(self) -> (Bytes, Vec<Command>, RequestConfig) {
        (self.buf.freeze(), self.commands, self.config)
    }

    fn bulk(&mut self, payload: &[u8]) {
        self.buf.put_u8(b'$');
        self.decimal(payload.len());
        self.buf.extend_from_slice(payload);
        self.buf.extend_from_slice(b"\r\n");
    }

    fn decimal(&mut self, val: usize) {
        self.buf.extend_from_slice(val.to_string().as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }
}

/// Commands whose replies come back as push frames rather than responses.
fn has_push_response(tag: &[u8]) -> bool {
    matches!(
        tag,
        b"SUBSCRIBE" | b"UNSUBSCRIBE" | b"PSUBSCRIBE" | b"PUNSUBSCRIBE"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_inline_array_of_bulk_strings() {
        let mut req = Request::new();
        req.push("GET", &["hello"]);

        assert_eq!(req.as_bytes(), b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n");
        assert_eq!(req.expected_responses(), 1);
    }

    #[test]
    fn pipelines_in_submission_order() {
        let mut req = Request::new();
        req.push("GET", &["a"]).push("INCR", &["c"]);

        assert_eq!(
            req.as_bytes(),
            b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$4\r\nINCR\r\n$1\r\nc\r\n"
        );
        assert_eq!(req.commands().len(), 2);
        assert_eq!(req.expected_responses(), 2);
    }

    #[test]
    fn subscribe_elicits_no_response() {
        let mut req = Request::new();
        req.push("subscribe", &["c1", "c2"]);
        req.push("ping", &[] as &[&str]);

        assert_eq!(req.commands()[0].responses(), 0);
        assert_eq!(req.commands()[0].tag(), b"SUBSCRIBE");
        assert_eq!(req.expected_responses(), 1);
    }

    #[test]
    fn empty_argument_lists_encode() {
        let mut req = Request::new();
        req.push("PING", &[] as &[&str]);

        assert_eq!(req.as_bytes(), b"*1\r\n$4\r\nPING\r\n");
    }
}
