//!
//! Error kinds surfaced by the connection and the response adapters.
//!

use thiserror::Error as ThisError;

/// All failure modes of the client core.
///
/// Adapter faults (`IncompatibleSize`, `ExpectsScalar`, `ExpectsAggregate`,
/// `Server`) complete the affected request and leave the connection running.
/// Everything else is fatal to the current `run`.
///
/// The type is `Clone` so a single terminal error can complete every pending
/// request slot.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The aggregate child count does not match the destination arity.
    #[error("protocol error; aggregate size does not match the destination")]
    IncompatibleSize,

    /// A non-scalar value arrived where the destination expects a scalar.
    #[error("protocol error; expected a scalar value")]
    ExpectsScalar,

    /// A scalar value arrived where the destination expects an aggregate.
    #[error("protocol error; expected an aggregate value")]
    ExpectsAggregate,

    /// Malformed RESP3 on the wire. Fatal to the connection.
    #[error("protocol error; {0}")]
    Parse(String),

    /// The server answered with an error reply.
    #[error("server error; {0}")]
    Server(String),

    /// Host name resolution did not finish within `resolve_timeout`.
    #[error("resolve timed out")]
    ResolveTimeout,

    /// No endpoint accepted the connection within `connect_timeout`.
    #[error("connect timed out")]
    ConnectTimeout,

    /// A socket read did not finish within `read_timeout`.
    #[error("read timed out")]
    ReadTimeout,

    /// A socket write did not finish within `write_timeout`.
    #[error("write timed out")]
    WriteTimeout,

    /// No data was received within twice the ping delay.
    #[error("idle timed out")]
    IdleTimeout,

    /// The transport failed or the peer closed the stream.
    #[error("connection lost; {0}")]
    ConnectionLost(String),

    /// The read buffer grew past `max_read_size` mid value.
    #[error("maximum read size exceeded")]
    ReadLimit,

    /// Caller initiated cancellation.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for Error {
    fn from(src: std::io::Error) -> Error {
        Error::ConnectionLost(src.to_string())
    }
}
