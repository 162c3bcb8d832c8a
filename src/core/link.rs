//! # Command Link
//!
//! A [`Link`] is a durable logical connection. One driver task owns the
//! physical transport, the FIFO queue of pending requests and the session
//! state (selected database). Handles talk to it over a channel and receive
//! replies on oneshot channels, so replies always resolve in submission
//! order.
//!
//! When the transport fails, the driver reconnects, replays the handshake
//! and then every request that has not been answered yet, in order.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::core::command::Cmd;
use crate::core::config::LinkConfig;
use crate::core::connection::{self, Connection};
use crate::core::transport::{self, Connector, Transport};
use crate::core::{Error, Executor, Result};
use crate::proto::frame::Frame;

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport is open.
    Idle,
    /// A transport is being opened.
    Connecting,
    /// A transport is open and the handshake has completed.
    Connected,
}

struct Pending {
    bytes: Bytes,
    reply: oneshot::Sender<Result<Frame>>,
    select: Option<u32>,
}

impl Pending {
    fn new(cmd: Cmd) -> (Self, oneshot::Receiver<Result<Frame>>) {
        let select = if cmd.is("SELECT") {
            cmd.arguments()
                .first()
                .and_then(|db| std::str::from_utf8(db).ok())
                .and_then(|db| db.parse().ok())
        } else {
            None
        };
        let (reply, rx) = oneshot::channel();
        let pending = Self {
            bytes: cmd.to_bytes(),
            reply,
            select,
        };
        (pending, rx)
    }
}

/// A handle to a resilient, multiplexed connection.
///
/// This handle is cheap to clone and can be shared across multiple tasks.
/// The connection is opened lazily on the first request.
///
/// Requests still unanswered when the connection drops are written again,
/// in order, once it is re-established. Delivery is therefore at-least-once:
/// a non-idempotent command such as `INCR` may run twice.
///
/// # Example
///
/// ```no_run
/// use redlink::{command, Link, LinkConfig};
///
/// #[tokio::main]
/// async fn main() -> redlink::Result<()> {
///     let link = Link::new(LinkConfig::from_uri("redis://127.0.0.1:6379")?)?;
///     let pong = link.execute(command::ping()).await?;
///     println!("{pong:?}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Link {
    requests: mpsc::Sender<Vec<Pending>>,
    referenced: Arc<watch::Sender<bool>>,
    state: watch::Receiver<LinkState>,
    address: Arc<str>,
}

impl Link {
    /// Creates a link and spawns its driver task.
    ///
    /// Must be called within a tokio runtime. No connection is attempted
    /// until the first request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no transport can be built for the
    /// configured address.
    pub fn new(config: LinkConfig) -> Result<Self> {
        let connector = transport::connector_for(&config)?;
        let (requests, rx) = mpsc::channel(config.queue_size.max(1));
        let (referenced, referenced_rx) = watch::channel(true);
        let (state_tx, state) = watch::channel(LinkState::Idle);
        let address: Arc<str> = config.address.to_string().into();

        let driver = Driver {
            database: config.database,
            config,
            connector,
            rx,
            referenced: referenced_rx,
            pending: VecDeque::new(),
            state: state_tx,
            open: true,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            requests,
            referenced: Arc::new(referenced),
            state,
            address,
        })
    }

    /// Sends a command and waits for its reply.
    ///
    /// Error replies from the server are returned as [`Frame::Error`].
    /// Dropping the returned future stops waiting; the command may still be
    /// sent and its reply is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] if the link gave up reconnecting while the
    /// command was pending.
    #[instrument(level = "debug", skip(self, cmd), fields(address = %self.address))]
    pub async fn execute(&self, cmd: Cmd) -> Result<Frame> {
        let (pending, rx) = Pending::new(cmd);
        self.submit(vec![pending]).await?;
        rx.await.map_err(|_| Error::closed())?
    }

    /// Sends several commands so that they are adjacent on the wire, and
    /// waits for all replies.
    pub async fn pipeline(&self, cmds: Vec<Cmd>) -> Result<Vec<Frame>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let (batch, receivers): (Vec<_>, Vec<_>) = cmds.into_iter().map(Pending::new).unzip();
        self.submit(batch).await?;

        let mut frames = Vec::with_capacity(receivers.len());
        for rx in receivers {
            frames.push(rx.await.map_err(|_| Error::closed())??);
        }
        Ok(frames)
    }

    async fn submit(&self, batch: Vec<Pending>) -> Result<()> {
        self.requests.send(batch).await.map_err(|_| Error::closed())
    }

    /// Keeps the connection open while idle. This is the default.
    pub fn reference(&self) {
        self.referenced.send_replace(true);
    }

    /// Lets the connection close after the idle timeout once nothing is
    /// pending. The next request reconnects.
    pub fn unreference(&self) {
        self.referenced.send_replace(false);
    }

    /// Watches the connection state.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    /// The address this link connects to.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("address", &self.address)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Executor for Link {
    fn execute(&self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>> {
        Box::pin(Link::execute(self, cmd))
    }
}

enum Outcome {
    /// Every handle is gone and nothing is pending.
    Closed,
    /// The idle timeout closed the transport.
    Idle,
}

struct SessionError {
    error: Error,
    progressed: bool,
}

struct Driver {
    config: LinkConfig,
    connector: Connector,
    rx: mpsc::Receiver<Vec<Pending>>,
    referenced: watch::Receiver<bool>,
    pending: VecDeque<Pending>,
    database: Option<u32>,
    state: watch::Sender<LinkState>,
    open: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            while self.pending.is_empty() {
                if !self.open {
                    debug!(address = %self.config.address, "link handles dropped, driver exiting");
                    return;
                }
                match self.rx.recv().await {
                    Some(batch) => self.pending.extend(batch),
                    None => self.open = false,
                }
            }

            match self.drive().await {
                Ok(Outcome::Closed) => return,
                Ok(Outcome::Idle) => {}
                Err(error) => self.stop(error),
            }
        }
    }

    /// Connects and serves sessions until the link closes, idles out or
    /// fails permanently.
    async fn drive(&mut self) -> Result<Outcome> {
        let mut failures = 0;
        loop {
            self.state.send_replace(LinkState::Connecting);
            let mut conn = connection::connect(&self.config, &self.connector, self.database).await?;
            self.state.send_replace(LinkState::Connected);
            info!(
                address = %self.config.address,
                replay = self.pending.len(),
                "link connected"
            );

            let result = self.session(&mut conn).await;
            self.state.send_replace(LinkState::Idle);
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(SessionError { error, progressed }) => {
                    failures = if progressed { 0 } else { failures + 1 };
                    warn!(
                        address = %self.config.address,
                        error = %error,
                        pending = self.pending.len(),
                        "link transport failed"
                    );
                    if failures >= self.config.reconnect.max_attempts {
                        return Err(error);
                    }
                    if !progressed {
                        sleep(self.config.reconnect.delay(failures)).await;
                    }
                }
            }
        }
    }

    async fn session(
        &mut self,
        conn: &mut Connection<Transport>,
    ) -> std::result::Result<Outcome, SessionError> {
        let mut progressed = false;
        let fail = |error: Error, progressed: bool| SessionError { error, progressed };

        if let Err(e) = conn.write_batch(self.pending.iter().map(|p| &p.bytes)).await {
            return Err(fail(e.into(), progressed));
        }

        let mut last_activity = Instant::now();
        let mut watching = true;
        loop {
            if !self.open && self.pending.is_empty() {
                return Ok(Outcome::Closed);
            }

            let waiting = !self.pending.is_empty();
            let idle = !waiting && !*self.referenced.borrow();
            let stall_deadline = self.config.read_timeout.map(|t| last_activity + t);
            let open = self.open;

            tokio::select! {
                batch = self.rx.recv(), if open => match batch {
                    Some(batch) => {
                        if self.pending.is_empty() {
                            last_activity = Instant::now();
                        }
                        let result = conn.write_batch(batch.iter().map(|p| &p.bytes)).await;
                        for pending in &batch {
                            debug!(bytes = pending.bytes.len(), "sent request");
                        }
                        self.pending.extend(batch);
                        if let Err(e) = result {
                            return Err(fail(e.into(), progressed));
                        }
                    }
                    None => self.open = false,
                },
                frame = conn.read_frame() => match frame {
                    Ok(frame) => {
                        self.complete(frame).map_err(|e| fail(e, progressed))?;
                        progressed = true;
                        last_activity = Instant::now();
                    }
                    Err(e) => return Err(fail(e, progressed)),
                },
                changed = self.referenced.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                },
                _ = stall(stall_deadline), if waiting && stall_deadline.is_some() => {
                    let error = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
                    return Err(fail(error.into(), progressed));
                },
                _ = sleep(self.config.idle_timeout), if idle => {
                    debug!(address = %self.config.address, "closing idle link");
                    return Ok(Outcome::Idle);
                },
            }
        }
    }

    fn complete(&mut self, frame: Frame) -> Result<()> {
        let pending = self.pending.pop_front().ok_or_else(|| Error::Protocol {
            message: "received a reply with no pending request".to_string(),
        })?;

        if let (Some(db), Frame::SimpleString(_)) = (pending.select, &frame) {
            debug!(database = db, "selected database");
            self.database = Some(db);
        }
        debug!(?frame, "received reply");
        let _ = pending.reply.send(Ok(frame));
        Ok(())
    }

    /// Fails everything pending with the same terminal error.
    fn stop(&mut self, error: Error) {
        while let Ok(batch) = self.rx.try_recv() {
            self.pending.extend(batch);
        }
        error!(
            address = %self.config.address,
            error = %error,
            pending = self.pending.len(),
            "link stopped"
        );

        let error = Arc::new(error);
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(Error::Stopped {
                source: error.clone(),
            }));
        }
        self.state.send_replace(LinkState::Idle);
    }
}

async fn stall(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
