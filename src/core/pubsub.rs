//! # Subscription Multiplexer
//!
//! A [`Subscriber`] shares one pub/sub connection between any number of
//! [`Subscription`]s. A channel or pattern is subscribed on the server once,
//! when its first sink registers, and unsubscribed when its last sink goes
//! away. Messages are fanned out to every sink of the channel or pattern,
//! and the next frame is not read until every sink has accepted the
//! current message.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::command::Cmd;
use crate::core::config::LinkConfig;
use crate::core::connection::{self, Connection};
use crate::core::link::LinkState;
use crate::core::transport::{self, Connector, Transport};
use crate::core::{Error, Result};
use crate::proto::frame::Frame;

/// A message received on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The channel the message was published to.
    pub channel: Bytes,
    /// The message body.
    pub payload: Bytes,
    /// The matching pattern, for pattern subscriptions.
    pub pattern: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Channel,
    Pattern,
}

impl Kind {
    fn subscribe(self) -> &'static str {
        match self {
            Kind::Channel => "SUBSCRIBE",
            Kind::Pattern => "PSUBSCRIBE",
        }
    }

    fn unsubscribe(self) -> &'static str {
        match self {
            Kind::Channel => "UNSUBSCRIBE",
            Kind::Pattern => "PUNSUBSCRIBE",
        }
    }
}

struct Sink {
    id: u64,
    tx: mpsc::Sender<Message>,
}

enum Control {
    Subscribe {
        kind: Kind,
        name: Bytes,
        sink: Sink,
        done: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        kind: Kind,
        name: Bytes,
        id: u64,
    },
}

/// A handle to a shared pub/sub connection.
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt;
/// use redlink::{LinkConfig, Subscriber};
///
/// #[tokio::main]
/// async fn main() -> redlink::Result<()> {
///     let subscriber = Subscriber::new(LinkConfig::from_uri("redis://127.0.0.1")?)?;
///     let mut news = subscriber.subscribe("news").await?;
///     while let Some(message) = news.next().await {
///         println!("{:?}", message.payload);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Subscriber {
    control: mpsc::UnboundedSender<Control>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
    state: watch::Receiver<LinkState>,
}

impl Subscriber {
    /// Creates a subscriber and spawns its driver task.
    ///
    /// The connection is opened on the first subscription.
    pub fn new(config: LinkConfig) -> Result<Self> {
        let connector = transport::connector_for(&config)?;
        let (control, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Idle);
        let buffer = config.subscription_buffer.max(1);

        let driver = Driver {
            config,
            connector,
            rx,
            channels: HashMap::new(),
            patterns: HashMap::new(),
            confirming: HashMap::new(),
            state: state_tx,
            open: true,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            control,
            next_id: Arc::new(AtomicU64::new(0)),
            buffer,
            state,
        })
    }

    /// Subscribes to a channel.
    ///
    /// Resolves once the server has confirmed the subscription.
    pub async fn subscribe(&self, channel: impl Into<Bytes>) -> Result<Subscription> {
        self.register(Kind::Channel, channel.into()).await
    }

    /// Subscribes to a glob-style pattern.
    pub async fn psubscribe(&self, pattern: impl Into<Bytes>) -> Result<Subscription> {
        self.register(Kind::Pattern, pattern.into()).await
    }

    /// Watches the connection state.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    async fn register(&self, kind: Kind, name: Bytes) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let (done, confirmed) = oneshot::channel();

        self.control
            .send(Control::Subscribe {
                kind,
                name: name.clone(),
                sink: Sink { id, tx },
                done,
            })
            .map_err(|_| Error::closed())?;

        // Built before waiting so an abandoned call still unsubscribes.
        let subscription = Subscription {
            kind,
            name,
            id,
            rx,
            control: self.control.clone(),
        };
        confirmed.await.map_err(|_| Error::closed())??;
        Ok(subscription)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// A stream of messages for one channel or pattern.
///
/// Dropping it unsubscribes; the server-side subscription ends when the last
/// subscription for the channel is gone.
pub struct Subscription {
    kind: Kind,
    name: Bytes,
    id: u64,
    rx: mpsc::Receiver<Message>,
    control: mpsc::UnboundedSender<Control>,
}

impl Subscription {
    /// Receives the next message, or `None` once the subscriber stopped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// The channel or pattern this subscription listens on.
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// Returns true for pattern subscriptions.
    pub fn is_pattern(&self) -> bool {
        self.kind == Kind::Pattern
    }

    /// Ends the subscription.
    pub fn unsubscribe(self) {}
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Unsubscribe {
            kind: self.kind,
            name: self.name.clone(),
            id: self.id,
        });
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("pattern", &self.is_pattern())
            .finish()
    }
}

struct Driver {
    config: LinkConfig,
    connector: Connector,
    rx: mpsc::UnboundedReceiver<Control>,
    channels: HashMap<Bytes, Vec<Sink>>,
    patterns: HashMap<Bytes, Vec<Sink>>,
    /// Waiters per `SUBSCRIBE` still in flight, oldest first. Each
    /// confirmation from the server resolves exactly one batch.
    confirming: HashMap<(Kind, Bytes), VecDeque<Waiters>>,
    state: watch::Sender<LinkState>,
    open: bool,
}

type Waiters = Vec<oneshot::Sender<Result<()>>>;

struct SessionError {
    error: Error,
    progressed: bool,
}

impl Driver {
    async fn run(mut self) {
        loop {
            while self.is_idle() {
                if !self.open {
                    return;
                }
                match self.rx.recv().await {
                    Some(control) => {
                        let _ = self.apply(control, None).await;
                    }
                    None => self.open = false,
                }
            }

            if let Err(error) = self.drive().await {
                self.stop(error);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty() && self.confirming.is_empty()
    }

    async fn drive(&mut self) -> Result<()> {
        let mut failures = 0;
        while !self.is_idle() {
            self.state.send_replace(LinkState::Connecting);
            let mut conn = connection::connect(&self.config, &self.connector, None).await?;
            self.state.send_replace(LinkState::Connected);

            let result = self.session(&mut conn).await;
            self.state.send_replace(LinkState::Idle);
            match result {
                Ok(()) => return Ok(()),
                Err(SessionError { error, progressed }) => {
                    failures = if progressed { 0 } else { failures + 1 };
                    warn!(error = %error, "subscriber transport failed");
                    if failures >= self.config.reconnect.max_attempts {
                        return Err(error);
                    }
                    if !progressed {
                        sleep(self.config.reconnect.delay(failures)).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn session(
        &mut self,
        conn: &mut Connection<Transport>,
    ) -> std::result::Result<(), SessionError> {
        let mut progressed = false;
        let fail = |error: Error, progressed: bool| SessionError { error, progressed };

        self.resubscribe(conn).await.map_err(|e| fail(e, progressed))?;

        loop {
            if self.is_idle() {
                debug!("no live subscriptions, closing connection");
                return Ok(());
            }
            let open = self.open;

            tokio::select! {
                control = self.rx.recv(), if open => match control {
                    Some(control) => self
                        .apply(control, Some(&mut *conn))
                        .await
                        .map_err(|e| fail(e, progressed))?,
                    None => self.open = false,
                },
                frame = conn.read_frame() => {
                    let frame = frame.map_err(|e| fail(e, progressed))?;
                    progressed = true;
                    self.dispatch(frame).await;
                }
            }
        }
    }

    /// Subscribes every live channel and pattern on a fresh connection.
    async fn resubscribe(&mut self, conn: &mut Connection<Transport>) -> Result<()> {
        let (channels, patterns) = (&self.channels, &self.patterns);
        self.confirming.retain(|(kind, name), _| match kind {
            Kind::Channel => channels.contains_key(name),
            Kind::Pattern => patterns.contains_key(name),
        });
        // One SUBSCRIBE per name goes out below, so one batch each.
        for batches in self.confirming.values_mut() {
            let merged: Waiters = batches.drain(..).flatten().collect();
            batches.push_back(merged);
        }

        for kind in [Kind::Channel, Kind::Pattern] {
            let names: Vec<Bytes> = self.sinks(kind).keys().cloned().collect();
            if names.is_empty() {
                continue;
            }
            info!(kind = kind.subscribe(), count = names.len(), "resubscribing");
            let cmd = Cmd::new(kind.subscribe()).args(names);
            conn.write_frame(&cmd.into_frame()).await?;
        }
        Ok(())
    }

    fn sinks(&self, kind: Kind) -> &HashMap<Bytes, Vec<Sink>> {
        match kind {
            Kind::Channel => &self.channels,
            Kind::Pattern => &self.patterns,
        }
    }

    fn sinks_mut(&mut self, kind: Kind) -> &mut HashMap<Bytes, Vec<Sink>> {
        match kind {
            Kind::Channel => &mut self.channels,
            Kind::Pattern => &mut self.patterns,
        }
    }

    async fn apply(
        &mut self,
        control: Control,
        conn: Option<&mut Connection<Transport>>,
    ) -> Result<()> {
        match control {
            Control::Subscribe {
                kind,
                name,
                sink,
                done,
            } => {
                let live = self.sinks(kind).contains_key(&name);
                self.sinks_mut(kind)
                    .entry(name.clone())
                    .or_default()
                    .push(sink);

                let key = (kind, name);
                if live {
                    // Join the SUBSCRIBE in flight for the live sinks, if any.
                    match self.confirming.get_mut(&key).and_then(|b| b.back_mut()) {
                        Some(waiters) => waiters.push(done),
                        None => {
                            let _ = done.send(Ok(()));
                        }
                    }
                } else {
                    // Batches left over from abandoned subscriptions are
                    // answered by their own confirmations first.
                    let name = key.1.clone();
                    self.confirming.entry(key).or_default().push_back(vec![done]);
                    if let Some(conn) = conn {
                        debug!(command = kind.subscribe(), channel = ?name, "subscribing");
                        let cmd = Cmd::new(kind.subscribe()).arg(name);
                        conn.write_frame(&cmd.into_frame()).await?;
                    }
                }
            }
            Control::Unsubscribe { kind, name, id } => {
                let sinks = self.sinks_mut(kind);
                let Some(list) = sinks.get_mut(&name) else {
                    return Ok(());
                };
                list.retain(|sink| sink.id != id);
                if list.is_empty() {
                    sinks.remove(&name);
                    if let Some(conn) = conn {
                        debug!(command = kind.unsubscribe(), channel = ?name, "unsubscribing");
                        let cmd = Cmd::new(kind.unsubscribe()).arg(name);
                        conn.write_frame(&cmd.into_frame()).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: Frame) {
        let items = match frame {
            Frame::Array(items) => items,
            Frame::Error(e) => {
                warn!(error = %e, "subscriber received an error reply");
                return;
            }
            other => {
                debug!(frame = ?other, "ignoring unexpected frame");
                return;
            }
        };

        let mut items = items.into_iter().map(bulk);
        let kind = items.next().flatten().unwrap_or_default();

        match &kind[..] {
            b"message" => {
                if let (Some(channel), Some(payload)) = (items.next().flatten(), items.next().flatten()) {
                    let message = Message {
                        channel: channel.clone(),
                        payload,
                        pattern: None,
                    };
                    self.deliver(Kind::Channel, &channel, message).await;
                }
            }
            b"pmessage" => {
                if let (Some(pattern), Some(channel), Some(payload)) = (
                    items.next().flatten(),
                    items.next().flatten(),
                    items.next().flatten(),
                ) {
                    let message = Message {
                        channel,
                        payload,
                        pattern: Some(pattern.clone()),
                    };
                    self.deliver(Kind::Pattern, &pattern, message).await;
                }
            }
            b"subscribe" => self.confirm(Kind::Channel, items.next().flatten()),
            b"psubscribe" => self.confirm(Kind::Pattern, items.next().flatten()),
            b"unsubscribe" | b"punsubscribe" => debug!("unsubscription confirmed"),
            _ => debug!(kind = ?kind, "ignoring unknown push frame"),
        }
    }

    fn confirm(&mut self, kind: Kind, name: Option<Bytes>) {
        let Some(name) = name else { return };
        debug!(channel = ?name, "subscription confirmed");
        let key = (kind, name);
        let Some(batches) = self.confirming.get_mut(&key) else {
            return;
        };
        if let Some(waiters) = batches.pop_front() {
            for done in waiters {
                let _ = done.send(Ok(()));
            }
        }
        if batches.is_empty() {
            self.confirming.remove(&key);
        }
    }

    /// Hands `message` to every sink, waiting for room in each.
    ///
    /// Sinks whose subscription was dropped fail immediately; their
    /// unsubscribe request removes them.
    async fn deliver(&mut self, kind: Kind, name: &Bytes, message: Message) {
        let targets: Vec<mpsc::Sender<Message>> = match self.sinks(kind).get(name) {
            Some(list) => list.iter().map(|sink| sink.tx.clone()).collect(),
            None => return,
        };
        let sends = targets.iter().map(|tx| tx.send(message.clone()));
        futures::future::join_all(sends).await;
    }

    fn stop(&mut self, error: Error) {
        error!(error = %error, "subscriber stopped");
        let error = Arc::new(error);
        for (_, batches) in self.confirming.drain() {
            for done in batches.into_iter().flatten() {
                let _ = done.send(Err(Error::Stopped {
                    source: error.clone(),
                }));
            }
        }
        self.channels.clear();
        self.patterns.clear();
        self.state.send_replace(LinkState::Idle);
    }
}

fn bulk(frame: Frame) -> Option<Bytes> {
    match frame {
        Frame::BulkString(b) => b,
        Frame::SimpleString(s) => Some(Bytes::from(s)),
        _ => None,
    }
}
