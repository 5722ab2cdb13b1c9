//! The static aggregate sink: one sub-sink per tuple slot, advanced by a
//! cursor.
//!
//! A tuple destination decodes in one of two ways, selected by the number of
//! responses the request expects:
//!
//! * **Pipelined** (K > 1 responses): response `r` is delegated wholly to
//!   slot `r`. The arity must equal K.
//! * **Exploded** (a single response): the top level value must be a sized
//!   aggregate whose expanded child count equals the arity; each depth-1
//!   subtree then feeds the next slot. The size check runs before any slot
//!   sees a node, so a mismatch never leaves partial state behind.

use crate::node::Node;
use crate::{Error, Result};

use super::{FromResp3, NodeSink};

macro_rules! tuple_sink {
    ($name:ident; $len:expr; $( ($T:ident, $idx:tt) ),+) => {
        pub struct $name<$($T: FromResp3),+> {
            sinks: ($($T::Sink,)+),
            idx: usize,
            responses: usize,
            started: bool,
            slot_started: bool,
            /// The exploded top was a scalar (possibly a streamed string);
            /// everything that follows belongs to slot 0 unshifted.
            scalar_top: bool,
        }

        impl<$($T: FromResp3),+> Default for $name<$($T),+> {
            fn default() -> Self {
                $name {
                    sinks: ($(<$T as FromResp3>::Sink::default(),)+),
                    idx: 0,
                    responses: 0,
                    started: false,
                    slot_started: false,
                    scalar_top: false,
                }
            }
        }

        impl<$($T: FromResp3),+> $name<$($T),+> {
            fn deliver(&mut self, node: &Node<'_>) -> Result<()> {
                match self.idx {
                    $( $idx => self.sinks.$idx.push(node), )+
                    _ => Err(Error::IncompatibleSize),
                }
            }
        }

        impl<$($T: FromResp3),+> NodeSink for $name<$($T),+> {
            fn expect_responses(&mut self, responses: usize) {
                self.responses = responses;
            }

            fn push(&mut self, node: &Node<'_>) -> Result<()> {
                // Pipelined: one top level response per slot.
                if self.responses > 1 {
                    if node.depth == 0 {
                        if self.responses != $len {
                            return Err(Error::IncompatibleSize);
                        }
                        if self.started {
                            self.idx += 1;
                        }
                        self.started = true;
                    }
                    return self.deliver(node);
                }

                // Exploded: a single sized aggregate spread over the slots.
                match node.depth {
                    0 => {
                        if self.started {
                            return Err(Error::IncompatibleSize);
                        }
                        self.started = true;
                        if !node.kind.is_aggregate() {
                            if $len != 1 {
                                return Err(Error::IncompatibleSize);
                            }
                            self.scalar_top = true;
                            return self.deliver(node);
                        }
                        match node.expanded_size() {
                            Some(children) if children == $len => Ok(()),
                            // Streamed tops cannot be size checked.
                            _ => Err(Error::IncompatibleSize),
                        }
                    }
                    // Streamed string chunks of a scalar top stay with the
                    // slot that owns the scalar, at their wire depth.
                    _ if self.scalar_top => self.deliver(node),
                    1 => {
                        if self.slot_started {
                            self.idx += 1;
                        }
                        self.slot_started = true;
                        self.deliver(&node.with_depth(0))
                    }
                    depth => self.deliver(&node.with_depth(depth - 1)),
                }
            }
        }

        impl<$($T: FromResp3),+> FromResp3 for ($($T,)+) {
            type Sink = $name<$($T),+>;

            fn finish(sink: $name<$($T),+>) -> Result<Self> {
                Ok(($($T::finish(sink.sinks.$idx)?,)+))
            }
        }
    };
}

tuple_sink!(Tuple1Sink; 1; (T0, 0));
tuple_sink!(Tuple2Sink; 2; (T0, 0), (T1, 1));
tuple_sink!(Tuple3Sink; 3; (T0, 0), (T1, 1), (T2, 2));
tuple_sink!(Tuple4Sink; 4; (T0, 0), (T1, 1), (T2, 2), (T3, 3));
tuple_sink!(Tuple5Sink; 5; (T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4));
tuple_sink!(Tuple6Sink; 6; (T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4), (T5, 5));
tuple_sink!(Tuple7Sink; 7; (T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4), (T5, 5), (T6, 6));
tuple_sink!(Tuple8Sink; 8; (T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4), (T5, 5), (T6, 6), (T7, 7));
