//! The full-duplex connection engine.
//!
//! A [`Connection`] multiplexes request pipelines over one TCP stream.
//! [`Connection::run`] owns the socket: it resolves, connects, and then
//! drives four cooperating tasks under one `select!` — a reader draining
//! responses into the queue head's destination, a writer coalescing pending
//! request payloads into single writes, a keepalive pinging through the
//! normal queue, and an idle watchdog failing the run when the server goes
//! quiet. The first task to fail cancels the others, pending requests are
//! failed (or preserved, per request), and the error is returned.
//!
//! Requests are submitted from any task through [`Connection::exec`]; the
//! handle is cheap to clone.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::try_stream;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::{self, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, timeout, Instant};
use tokio_stream::Stream;
use tracing::{debug, instrument};

use crate::adapt::{FromResp3, NodeSink};
use crate::lexer::{Lexer, Step};
use crate::node::{Kind, Node, OwnedNode};
use crate::push::PushMessage;
use crate::queue::{RequestQueue, ResponseHandler};
use crate::request::Request;
use crate::{Error, Result};

/// Configuration parameters of a connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout of host name resolution.
    pub resolve_timeout: Duration,
    /// Timeout of establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Timeout of each socket read.
    pub read_timeout: Duration,
    /// Timeout of each socket write.
    pub write_timeout: Duration,
    /// Keepalive period; the idle threshold is twice this value.
    pub ping_delay: Duration,
    /// Ceiling on the read buffer. Exceeding it mid value fails the run.
    pub max_read_size: usize,
    /// Capacity of the push channel. When full, reads stall until the
    /// application drains it.
    pub push_capacity: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            ping_delay: Duration::from_secs(5),
            max_read_size: usize::MAX,
            push_capacity: 32,
        }
    }
}

/// Caller-initiated teardown requests, observed by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    None,
    /// Drop the socket; the run returns `ConnectionLost` and the queue is
    /// preserved for the next run.
    Reset,
    /// Terminal teardown; pending requests are cancelled.
    Close,
}

struct Shared {
    cfg: Config,
    queue: RequestQueue,
    last_data: Mutex<Instant>,
    push_tx: mpsc::Sender<PushMessage>,
    push_rx: tokio::sync::Mutex<mpsc::Receiver<PushMessage>>,
    signal_tx: watch::Sender<Signal>,
    running: AtomicBool,
}

/// A handle to one multiplexed RESP3 connection.
///
/// Cloning is shallow; all clones share the same queue, socket and push
/// channel.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(cfg: Config) -> Connection {
        let (push_tx, push_rx) = mpsc::channel(cfg.push_capacity.max(1));
        let (signal_tx, _) = watch::channel(Signal::None);
        Connection {
            shared: Arc::new(Shared {
                cfg,
                queue: RequestQueue::new(),
                last_data: Mutex::new(Instant::now()),
                push_tx,
                push_rx: tokio::sync::Mutex::new(push_rx),
                signal_tx,
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Runs the connection until it fails.
    ///
    /// Resolves `host`, connects, and keeps reading and writing until a
    /// fatal error occurs; the error is returned after every task has been
    /// cancelled and pending requests have been failed. Requests that opted
    /// out of `cancel_on_connection_lost` survive in the queue: calling
    /// `run` again retransmits them over the fresh connection.
    #[instrument(skip(self))]
    pub async fn run(&self, host: &str, port: u16) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        self.shared.signal_tx.send_replace(Signal::None);

        let err = match self.run_inner(host, port).await {
            Ok(()) => Error::ConnectionLost("run loop ended".into()),
            Err(err) => err,
        };
        debug!(%err, "run finished");
        self.shared.queue.fail_all(&err);
        self.shared.running.store(false, Ordering::SeqCst);
        Err(err)
    }

    /// Submits a request and waits for its responses to decode into `T`.
    ///
    /// Responses complete in submission order across all callers. On success
    /// the number of bytes written for the request is returned alongside the
    /// decoded value. Requests may be submitted while `run` is not active;
    /// they are sent once a connection is established.
    ///
    /// Dropping the returned future removes the request if it has not been
    /// written yet; once written it stays in flight so the stream of
    /// responses remains aligned with the queue.
    #[instrument(skip(self, req), fields(commands = req.commands().len()))]
    pub async fn exec<T: FromResp3>(&self, req: Request) -> Result<(T, usize)> {
        let expected = req.expected_responses();
        let (bytes, _commands, config) = req.into_parts();
        let (tx, rx) = oneshot::channel();
        let handler = ExecHandler::<T>::new(expected as usize, tx);
        let id = self.shared.queue.enqueue(
            bytes,
            expected,
            config.cancel_on_connection_lost,
            Box::new(handler),
        );

        // Removes the slot if this future is dropped before the writer
        // takes it; a no-op after completion.
        let guard = ExecGuard {
            queue: &self.shared.queue,
            id,
        };
        let outcome = rx.await;
        drop(guard);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionLost("connection closed".into())),
        }
    }

    /// Receives the next server push frame, waiting if necessary.
    pub async fn read_push(&self) -> Result<PushMessage> {
        let mut rx = self.shared.push_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => msg.ok_or(Error::Cancelled),
            () = self.wait_close() => Err(Error::Cancelled),
        }
    }

    /// Converts the push channel into a `Stream` of messages.
    ///
    /// The stream ends with an error once the connection is closed.
    pub fn push_stream(&self) -> impl Stream<Item = Result<PushMessage>> {
        let conn = self.clone();
        try_stream! {
            loop {
                let msg = conn.read_push().await?;
                yield msg;
            }
        }
    }

    /// Fails every request that has not been written yet with `Cancelled`.
    /// Requests already on the wire complete normally.
    pub fn cancel(&self) {
        self.shared.queue.fail_unsent(&Error::Cancelled);
    }

    /// Drops the socket. The active `run` returns `ConnectionLost`; the
    /// queue is preserved subject to each request's
    /// `cancel_on_connection_lost`.
    pub fn reset_stream(&self) {
        debug!("stream reset requested");
        self.shared.signal_tx.send_replace(Signal::Reset);
    }

    /// Forcibly tears the connection down: the active `run` returns, every
    /// pending request fails with `Cancelled` and push delivery stops.
    pub fn close(&self) {
        debug!("close requested");
        self.shared.signal_tx.send_replace(Signal::Close);
        self.shared.queue.clear(&Error::Cancelled);
    }

    async fn run_inner(&self, host: &str, port: u16) -> Result<()> {
        let cfg = &self.shared.cfg;

        let addrs: Vec<SocketAddr> = timeout(cfg.resolve_timeout, net::lookup_host((host, port)))
            .await
            .map_err(|_| Error::ResolveTimeout)?
            .map_err(|err| Error::ConnectionLost(err.to_string()))?
            .collect();
        debug!(?addrs, "resolved");

        let mut stream = timeout(cfg.connect_timeout, connect_any(&addrs))
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        debug!("connected");
        self.touch();

        let (mut rd, mut wr) = stream.split();
        tokio::select! {
            res = self.reader(&mut rd) => res,
            res = self.writer(&mut wr) => res,
            res = self.keepalive() => res,
            res = self.idle_check() => res,
            res = self.wait_signal() => res,
        }
    }

    /// Drains the socket, decoding one top level response at a time into the
    /// queue head's destination, or into the push channel for `>` frames.
    async fn reader(&self, rd: &mut ReadHalf<'_>) -> Result<()> {
        let mut route: Option<Route> = None;
        let result = self.read_loop(rd, &mut route).await;

        // A fatal error mid response hands the in-flight destination back so
        // teardown fails it with the root error.
        if let Some(Route::Slot { id, handler }) = route.take() {
            self.shared.queue.restore(id, handler);
        }
        result
    }

    async fn read_loop(
        &self,
        rd: &mut ReadHalf<'_>,
        route: &mut Option<Route>,
    ) -> Result<()> {
        let cfg = &self.shared.cfg;
        let mut buf = BytesMut::with_capacity(4 * 1024);
        let mut lexer = Lexer::new();

        loop {
            // Lex every complete token currently buffered.
            loop {
                let consumed = match lexer.step(&buf[..])? {
                    Step::Incomplete => break,
                    Step::Skip(n) => n,
                    Step::Node(node, n) => {
                        if node.depth == 0 {
                            *route = Some(self.route_for(&node)?);
                        }
                        match route.as_mut() {
                            Some(Route::Push(nodes)) => nodes.push(node.to_owned()),
                            Some(Route::Slot { handler, .. }) => handler.on_node(&node),
                            None => {
                                return Err(Error::Parse("node outside a response".into()));
                            }
                        }
                        n
                    }
                };
                buf.advance(consumed);

                if lexer.is_idle() {
                    if let Some(route) = route.take() {
                        self.finish_response(route).await?;
                    }
                }
            }

            // The buffer never grows past the configured ceiling; a value
            // still incomplete at that point can never be finished.
            let headroom = cfg.max_read_size.saturating_sub(buf.len());
            if headroom == 0 {
                return Err(Error::ReadLimit);
            }
            let mut limited = (&mut buf).limit(headroom);
            let read = timeout(cfg.read_timeout, rd.read_buf(&mut limited))
                .await
                .map_err(|_| Error::ReadTimeout)??;
            if read == 0 {
                return Err(Error::ConnectionLost("server closed the connection".into()));
            }
            self.touch();
        }
    }

    fn route_for(&self, node: &Node<'_>) -> Result<Route> {
        if node.kind == Kind::Push {
            return Ok(Route::Push(Vec::new()));
        }
        let (id, handler) = self.shared.queue.begin_response()?;
        Ok(Route::Slot { id, handler })
    }

    async fn finish_response(&self, route: Route) -> Result<()> {
        match route {
            Route::Push(nodes) => {
                debug!(nodes = nodes.len(), "push frame received");
                // Backpressure: a full channel stalls further reads until
                // the application drains it.
                self.shared
                    .push_tx
                    .send(PushMessage { nodes })
                    .await
                    .map_err(|_| Error::Cancelled)
            }
            Route::Slot { id, handler } => {
                self.shared.queue.end_response(id, handler);
                Ok(())
            }
        }
    }

    /// Waits for pending requests and writes them, coalescing every unsent
    /// payload into a single write.
    async fn writer(&self, wr: &mut WriteHalf<'_>) -> Result<()> {
        let cfg = &self.shared.cfg;
        loop {
            let Some(batch) = self.shared.queue.take_unsent() else {
                self.shared.queue.writable.notified().await;
                continue;
            };
            debug!(bytes = batch.len(), "writing request batch");
            timeout(cfg.write_timeout, wr.write_all(&batch))
                .await
                .map_err(|_| Error::WriteTimeout)??;
            self.shared.queue.finish_write();
        }
    }

    /// Pings the server through the normal queue on every quiet period.
    ///
    /// The internal request decodes into an ignore sink, so no user supplied
    /// destination ever observes a keepalive pong.
    async fn keepalive(&self) -> Result<()> {
        loop {
            time::sleep(self.shared.cfg.ping_delay).await;
            debug!("keepalive ping");
            let mut req = Request::new();
            req.push("PING", &[] as &[&str]);
            self.exec::<()>(req).await?;
        }
    }

    /// Fails the run when nothing has been received for twice the ping
    /// delay.
    async fn idle_check(&self) -> Result<()> {
        let threshold = 2 * self.shared.cfg.ping_delay;
        loop {
            time::sleep(threshold).await;
            let idle = self.shared.last_data.lock().unwrap().elapsed();
            if idle >= threshold {
                debug!(?idle, "idle threshold exceeded");
                return Err(Error::IdleTimeout);
            }
        }
    }

    async fn wait_signal(&self) -> Result<()> {
        let mut rx = self.shared.signal_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                Signal::Close => return Err(Error::Cancelled),
                Signal::Reset => {
                    return Err(Error::ConnectionLost("stream reset by caller".into()));
                }
                Signal::None => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::Cancelled);
            }
        }
    }

    async fn wait_close(&self) {
        let mut rx = self.shared.signal_tx.subscribe();
        loop {
            if matches!(*rx.borrow_and_update(), Signal::Close) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn touch(&self) {
        *self.shared.last_data.lock().unwrap() = Instant::now();
    }
}

/// Destination of the top level response currently being decoded.
enum Route {
    /// A `>` frame, materialized for the push channel.
    Push(Vec<OwnedNode>),
    /// A command response, driven into the head slot's handler.
    Slot {
        id: u64,
        handler: Box<dyn ResponseHandler>,
    },
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream> {
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, %err, "endpoint refused");
                last = Some(err);
            }
        }
    }
    Err(Error::ConnectionLost(match last {
        Some(err) => err.to_string(),
        None => "host resolved to no addresses".into(),
    }))
}

/// Couples a destination sink with the `exec` caller's completion signal.
struct ExecHandler<T: FromResp3> {
    sink: T::Sink,
    error: Option<Error>,
    tx: Option<oneshot::Sender<Result<(T, usize)>>>,
}

impl<T: FromResp3> ExecHandler<T> {
    fn new(responses: usize, tx: oneshot::Sender<Result<(T, usize)>>) -> ExecHandler<T> {
        let mut sink = T::Sink::default();
        sink.expect_responses(responses);
        ExecHandler {
            sink,
            error: None,
            tx: Some(tx),
        }
    }
}

impl<T: FromResp3> ResponseHandler for ExecHandler<T> {
    fn on_node(&mut self, node: &Node<'_>) {
        // After the first fault the rest of the response is drained so the
        // wire stays aligned.
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.sink.push(node) {
            debug!(%err, "response adapter fault; draining");
            self.error = Some(err);
        }
    }

    fn complete(mut self: Box<Self>, result: Result<usize>) {
        let Some(tx) = self.tx.take() else { return };
        let outcome = match (self.error.take(), result) {
            (_, Err(err)) => Err(err),
            (Some(err), Ok(_)) => Err(err),
            (None, Ok(written)) => T::finish(self.sink).map(|value| (value, written)),
        };
        let _ = tx.send(outcome);
    }
}

struct ExecGuard<'a> {
    queue: &'a RequestQueue,
    id: u64,
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        self.queue.cancel_unsent(self.id);
    }
}
