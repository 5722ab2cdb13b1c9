//! The FIFO of in-flight requests.
//!
//! The queue is the sole rendezvous between `exec` callers, the writer task
//! and the reader task. State lives under a mutex held only across
//! non-suspending sections; the writer parks on the `writable` notifier and
//! is woken when a request becomes eligible to write.
//!
//! Responses are attributed strictly in enqueue order: the reader always
//! decodes into the front-most slot that has been sent and still awaits
//! responses. Slots whose commands elicit no responses complete as soon as
//! their bytes are written and are never attributed a response.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;
use tracing::debug;

use crate::node::Node;
use crate::{Error, Result};

/// A type-erased response consumer: the destination sink plus the completion
/// signal of one `exec` call.
pub(crate) trait ResponseHandler: Send {
    /// Feeds one lexer node. Decode faults are recorded, not returned; the
    /// remaining nodes of the response must still be drained so the wire
    /// stays aligned.
    fn on_node(&mut self, node: &Node<'_>);

    /// Completes the request: `Ok(bytes_written)` finishes the sink into the
    /// destination, an error fails the caller.
    fn complete(self: Box<Self>, result: Result<usize>);
}

pub(crate) struct Slot {
    id: u64,
    bytes: Bytes,
    expected: u32,
    remaining: u32,
    sent: bool,
    written: usize,
    cancel_on_connection_lost: bool,
    handler: Option<Box<dyn ResponseHandler>>,
}

#[derive(Default)]
struct State {
    slots: VecDeque<Slot>,
    next_id: u64,
}

/// FIFO of request slots with per-request completion signals.
pub(crate) struct RequestQueue {
    state: Mutex<State>,
    /// Signals the writer that an unsent request is waiting.
    pub(crate) writable: Notify,
}

impl RequestQueue {
    pub(crate) fn new() -> RequestQueue {
        RequestQueue {
            state: Mutex::new(State::default()),
            writable: Notify::new(),
        }
    }

    /// Appends a slot and wakes the writer if nothing was eligible to write
    /// before this call. Returns the slot id.
    pub(crate) fn enqueue(
        &self,
        bytes: Bytes,
        expected: u32,
        cancel_on_connection_lost: bool,
        handler: Box<dyn ResponseHandler>,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        let can_write = state.slots.iter().all(|slot| slot.sent);
        let id = state.next_id;
        state.next_id += 1;
        state.slots.push_back(Slot {
            id,
            bytes,
            expected,
            remaining: expected,
            sent: false,
            written: 0,
            cancel_on_connection_lost,
            handler: Some(handler),
        });
        drop(state);

        if can_write {
            self.writable.notify_one();
        }
        id
    }

    /// Coalesces every unsent payload into one buffer, marking the slots
    /// sent. Marking happens at take time so a cancelled `exec` can never
    /// remove bytes that are about to hit the wire.
    pub(crate) fn take_unsent(&self) -> Option<Bytes> {
        let mut state = self.state.lock().unwrap();
        let mut buf = BytesMut::new();
        for slot in state.slots.iter_mut().filter(|slot| !slot.sent) {
            buf.extend_from_slice(&slot.bytes);
            slot.sent = true;
            slot.written = slot.bytes.len();
        }
        if buf.is_empty() {
            None
        } else {
            Some(buf.freeze())
        }
    }

    /// After a successful write: completes the slots that expect no
    /// responses at all.
    pub(crate) fn finish_write(&self) {
        let mut done = Vec::new();
        let mut state = self.state.lock().unwrap();
        let mut index = 0;
        while index < state.slots.len() {
            if state.slots[index].sent && state.slots[index].remaining == 0 {
                done.push(state.slots.remove(index).expect("index in bounds"));
            } else {
                index += 1;
            }
        }
        drop(state);

        for mut slot in done {
            if let Some(handler) = slot.handler.take() {
                handler.complete(Ok(slot.written));
            }
        }
    }

    /// Hands out the handler of the slot the next response belongs to.
    pub(crate) fn begin_response(&self) -> Result<(u64, Box<dyn ResponseHandler>)> {
        let mut state = self.state.lock().unwrap();
        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.sent && slot.remaining > 0)
            .ok_or_else(|| Error::Parse("response without a pending request".into()))?;
        let handler = slot
            .handler
            .take()
            .ok_or_else(|| Error::Parse("response for a completed request".into()))?;
        Ok((slot.id, handler))
    }

    /// Puts a handler back without booking a response, used when decoding is
    /// abandoned by a fatal connection error; teardown then completes the
    /// slot with the root error.
    pub(crate) fn restore(&self, id: u64, handler: Box<dyn ResponseHandler>) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.iter_mut().find(|slot| slot.id == id) {
            slot.handler = Some(handler);
        }
    }

    /// Books one decoded response against the slot, completing it when the
    /// last expected response has arrived.
    pub(crate) fn end_response(&self, id: u64, handler: Box<dyn ResponseHandler>) {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.slots.iter().position(|slot| slot.id == id) else {
            return;
        };
        let slot = &mut state.slots[index];
        slot.remaining -= 1;
        if slot.remaining > 0 {
            slot.handler = Some(handler);
            return;
        }
        let slot = state.slots.remove(index).expect("index in bounds");
        drop(state);

        debug!(id = slot.id, "request complete");
        handler.complete(Ok(slot.written));
    }

    /// Fails every pending slot with `err`, except that slots which opted
    /// out of `cancel_on_connection_lost` and have not consumed any response
    /// yet are retained, unsent again, for the next `run` to retransmit.
    pub(crate) fn fail_all(&self, err: &Error) {
        let mut failed = Vec::new();
        let mut state = self.state.lock().unwrap();
        let mut index = 0;
        while index < state.slots.len() {
            let slot = &mut state.slots[index];
            let keep = !slot.cancel_on_connection_lost
                && slot.handler.is_some()
                && slot.remaining == slot.expected;
            if keep {
                slot.sent = false;
                slot.written = 0;
                index += 1;
            } else {
                failed.push(state.slots.remove(index).expect("index in bounds"));
            }
        }
        drop(state);

        for mut slot in failed {
            if let Some(handler) = slot.handler.take() {
                handler.complete(Err(err.clone()));
            }
        }
    }

    /// Fails every pending slot unconditionally. Used by caller-initiated
    /// cancellation and teardown.
    pub(crate) fn clear(&self, err: &Error) {
        let slots: Vec<Slot> = {
            let mut state = self.state.lock().unwrap();
            state.slots.drain(..).collect()
        };
        for mut slot in slots {
            if let Some(handler) = slot.handler.take() {
                handler.complete(Err(err.clone()));
            }
        }
    }

    /// Fails every slot whose bytes have not been written yet. Slots on the
    /// wire are left alone so response attribution stays intact.
    pub(crate) fn fail_unsent(&self, err: &Error) {
        let mut failed = Vec::new();
        let mut state = self.state.lock().unwrap();
        let mut index = 0;
        while index < state.slots.len() {
            if state.slots[index].sent {
                index += 1;
            } else {
                failed.push(state.slots.remove(index).expect("index in bounds"));
            }
        }
        drop(state);

        for mut slot in failed {
            if let Some(handler) = slot.handler.take() {
                handler.complete(Err(err.clone()));
            }
        }
    }

    /// Removes a slot whose `exec` future was dropped, provided its bytes
    /// have not been handed to the transport; a sent slot stays in flight so
    /// the wire remains aligned.
    pub(crate) fn cancel_unsent(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state
            .slots
            .iter()
            .position(|slot| slot.id == id && !slot.sent)
        {
            debug!(id, "exec dropped before write; removing slot");
            state.slots.remove(index);
        }
    }
}
