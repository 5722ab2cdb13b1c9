//! An asynchronous client core for servers speaking RESP3.
//!
//! The major components are:
//! * `lexer`: streams wire bytes into typed protocol nodes.
//! * `adapt`: decodes node streams into caller supplied destination types.
//! * `request`: encodes command pipelines into single write buffers.
//! * `connection`: multiplexes pipelines over one socket with keepalive,
//!   idle detection and FIFO completion.
//! * `push`: out-of-band delivery of server initiated messages.

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod adapt;
pub use adapt::{decode, decode_n, FromResp3, FromScalar, NodeSink};

pub mod connection;
pub use connection::{Config, Connection};

pub mod error;
pub use error::Error;

pub mod lexer;
pub use lexer::{Lexer, Step};

pub mod node;
pub use node::{AggregateSize, Kind, Node, NodeTree, OwnedNode};

pub mod push;
pub use push::PushMessage;

mod queue;

pub mod request;
pub use request::{Request, RequestConfig};

/// Default port that a RESP3 server listens on.
pub const DEFAULT_PORT: u16 = 6379;

pub type Result<T> = std::result::Result<T, Error>;
