//! In-process Redis stand-in for unit tests.
//!
//! Speaks RESP over real TCP and implements the commands this crate sends:
//! strings, lists, expiry, auth and database selection, pub/sub, the lock
//! scripts and enough of cluster mode to answer `MOVED` and `ASK`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cluster")]
use crate::cluster::key_slot;
#[cfg(feature = "cluster")]
use crate::core::command::Cmd;
use crate::core::config::LinkConfig;
use crate::core::connection::Connection;
use crate::mutex::scripts;
use crate::proto::frame::Frame;

const DATABASES: u32 = 16;
const LAST_SLOT: u16 = 16383;

/// Installs a test subscriber honouring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
pub(crate) struct MockServerBuilder {
    password: Option<String>,
    slots: Option<(u16, u16)>,
}

impl MockServerBuilder {
    /// Requires `AUTH` with this password.
    pub(crate) fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Runs in cluster mode, owning `first..=last`.
    pub(crate) fn slots(mut self, first: u16, last: u16) -> Self {
        self.slots = Some((first, last));
        self
    }

    pub(crate) async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            password: self.password,
            kill,
            state: Mutex::new(State {
                cluster: self.slots.map(|owned| Cluster {
                    owned,
                    peer: None,
                    migrating: HashSet::new(),
                    importing: HashSet::new(),
                }),
                ..State::default()
            }),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept(listener, shared.clone(), shutdown_rx));
        MockServer {
            addr,
            shared,
            shutdown,
        }
    }
}

/// A running mock server. Dropping it closes the listener and every
/// connection.
pub(crate) struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl MockServer {
    pub(crate) async fn start() -> Self {
        Self::builder().start().await
    }

    pub(crate) fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// `host:port`.
    pub(crate) fn address(&self) -> String {
        self.addr.to_string()
    }

    pub(crate) fn uri(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// A link configuration for this server with short reconnect delays.
    pub(crate) fn config(&self) -> LinkConfig {
        let mut config = LinkConfig::new(self.addr.ip().to_string(), self.addr.port());
        config.reconnect.base_delay = Duration::from_millis(5);
        config.reconnect.max_delay = Duration::from_millis(50);
        config
    }

    /// Names of every command received so far, uppercased, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.shared.state().commands.clone()
    }

    /// Connections accepted so far.
    pub(crate) fn connection_count(&self) -> usize {
        self.shared.state().connections
    }

    /// Drops every open connection. New connections are still accepted.
    pub(crate) fn kill_connections(&self) {
        self.shared.state().subscribers.clear();
        self.shared.kill.send_modify(|epoch| *epoch += 1);
    }

    /// Stops accepting and drops every open connection.
    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.kill_connections();
    }

    /// Reads a string key from database 0.
    pub(crate) fn get_raw(&self, key: &str) -> Option<Bytes> {
        let mut state = self.shared.state();
        match state.entry(0, key.as_bytes()) {
            Some(Value::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Writes a string key in database 0.
    pub(crate) fn set_raw(&self, key: &str, value: impl Into<Bytes>) {
        let mut state = self.shared.state();
        state.db(0).insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Entry::new(Value::Str(value.into())),
        );
    }

    pub(crate) fn del_raw(&self, key: &str) {
        self.shared.state().db(0).remove(key.as_bytes());
    }

    /// Length of a list in database 0.
    pub(crate) fn list_len(&self, key: &str) -> usize {
        let mut state = self.shared.state();
        match state.entry(0, key.as_bytes()) {
            Some(Value::List(list)) => list.len(),
            _ => 0,
        }
    }

    /// Sends `MOVED` and `ASK` redirects to `peer`.
    pub(crate) fn set_peer(&self, peer: &MockServer) {
        if let Some(cluster) = self.shared.state().cluster.as_mut() {
            cluster.peer = Some(peer.address());
        }
    }

    /// Marks `slot` as migrating to the peer: missing keys answer `ASK`.
    pub(crate) fn migrate_slot(&self, slot: u16) {
        if let Some(cluster) = self.shared.state().cluster.as_mut() {
            cluster.migrating.insert(slot);
        }
    }

    /// Accepts `slot` from connections that sent `ASKING`.
    pub(crate) fn import_slot(&self, slot: u16) {
        if let Some(cluster) = self.shared.state().cluster.as_mut() {
            cluster.importing.insert(slot);
        }
    }

    pub(crate) fn own_all_slots(&self) {
        if let Some(cluster) = self.shared.state().cluster.as_mut() {
            cluster.owned = (0, LAST_SLOT);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.shared.kill.send_modify(|epoch| *epoch += 1);
    }
}

struct Shared {
    password: Option<String>,
    kill: watch::Sender<u64>,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct State {
    dbs: HashMap<u32, HashMap<Bytes, Entry>>,
    commands: Vec<String>,
    connections: usize,
    scripts: HashMap<String, Lua>,
    subscribers: HashMap<usize, Listener>,
    cluster: Option<Cluster>,
}

struct Cluster {
    owned: (u16, u16),
    peer: Option<String>,
    migrating: HashSet<u16>,
    importing: HashSet<u16>,
}

struct Listener {
    push: mpsc::UnboundedSender<Frame>,
    channels: HashSet<Bytes>,
    patterns: HashSet<Bytes>,
}

enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

#[derive(Clone, Copy)]
enum Lua {
    Lock,
    Unlock,
    Renew,
    Return(i64),
}

impl Lua {
    fn recognize(source: &[u8]) -> Option<Self> {
        let source = std::str::from_utf8(source).ok()?;
        if source == scripts::LOCK {
            Some(Lua::Lock)
        } else if source == scripts::UNLOCK {
            Some(Lua::Unlock)
        } else if source == scripts::RENEW {
            Some(Lua::Renew)
        } else {
            source
                .trim()
                .strip_prefix("return ")
                .and_then(|n| n.trim().parse().ok())
                .map(Lua::Return)
        }
    }
}

struct Session {
    id: usize,
    db: u32,
    authenticated: bool,
    asking: bool,
    push: mpsc::UnboundedSender<Frame>,
}

async fn accept(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { return };
                let id = {
                    let mut state = shared.state();
                    state.connections += 1;
                    state.connections
                };
                let kill = shared.kill.subscribe();
                tokio::spawn(serve(shared.clone(), stream, kill, id));
            }
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        }
    }
}

async fn serve(shared: Arc<Shared>, stream: TcpStream, mut kill: watch::Receiver<u64>, id: usize) {
    let (push, mut pushed) = mpsc::unbounded_channel();
    let mut session = Session {
        id,
        db: 0,
        authenticated: shared.password.is_none(),
        asking: false,
        push,
    };
    let mut conn = Connection::new(stream);

    loop {
        tokio::select! {
            biased;
            _ = kill.changed() => break,
            Some(frame) = pushed.recv() => {
                if conn.write_frame(&frame).await.is_err() {
                    break;
                }
            }
            request = conn.read_frame() => {
                let Ok(request) = request else { break };
                let replies = handle(&shared, &mut session, request);
                let mut failed = false;
                for reply in &replies {
                    failed |= conn.write_frame(reply).await.is_err();
                }
                if failed {
                    break;
                }
            }
        }
    }
    shared.state().subscribers.remove(&id);
}

fn handle(shared: &Shared, session: &mut Session, request: Frame) -> Vec<Frame> {
    let args: Vec<Bytes> = match request.into_array() {
        Some(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Frame::BulkString(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        None => return vec![Frame::error("ERR protocol error")],
    };
    let Some(name) = args.first() else {
        return vec![Frame::error("ERR empty command")];
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();

    let mut state = shared.state();
    state.commands.push(name.clone());

    if name == "AUTH" {
        return vec![auth(shared, session, &args)];
    }
    if !session.authenticated {
        return vec![Frame::error("NOAUTH Authentication required.")];
    }

    #[cfg(feature = "cluster")]
    {
        let asking = std::mem::take(&mut session.asking);
        if let Some(redirect) = state.redirect(session.db, &args, asking) {
            return vec![redirect];
        }
    }

    match name.as_str() {
        "SUBSCRIBE" | "PSUBSCRIBE" => state.subscribe(session, &args[1..], name == "PSUBSCRIBE"),
        "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
            state.unsubscribe(session, &args[1..], name == "PUNSUBSCRIBE")
        }
        _ => vec![state.execute(session, &name, &args)],
    }
}

fn auth(shared: &Shared, session: &mut Session, args: &[Bytes]) -> Frame {
    let Some(expected) = &shared.password else {
        return Frame::error(
            "ERR AUTH <password> called without any password configured for the default user",
        );
    };
    let given = match args {
        [_, password] | [_, _, password] => password,
        _ => return Frame::error("ERR wrong number of arguments for 'auth' command"),
    };
    if given.as_ref() == expected.as_bytes() {
        session.authenticated = true;
        ok()
    } else {
        Frame::error("WRONGPASS invalid username-password pair or user is disabled.")
    }
}

impl State {
    fn db(&mut self, index: u32) -> &mut HashMap<Bytes, Entry> {
        let db = self.dbs.entry(index).or_default();
        let now = Instant::now();
        db.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        db
    }

    fn entry(&mut self, index: u32, key: &[u8]) -> Option<&mut Value> {
        self.db(index).get_mut(key).map(|entry| &mut entry.value)
    }

    #[cfg(feature = "cluster")]
    fn redirect(&mut self, db: u32, args: &[Bytes], asking: bool) -> Option<Frame> {
        self.cluster.as_ref()?;
        let cmd = Cmd::new(args[0].clone()).args(args[1..].iter().cloned());
        let key = Bytes::copy_from_slice(cmd.routing_key()?);
        let slot = key_slot(&key);

        let exists = self.db(db).contains_key(&key);
        let cluster = self.cluster.as_ref()?;
        let peer = cluster.peer.clone().unwrap_or_default();
        let (first, last) = cluster.owned;

        if (first..=last).contains(&slot) {
            if cluster.migrating.contains(&slot) && !exists {
                return Some(Frame::error(format!("ASK {slot} {peer}")));
            }
            return None;
        }
        if asking && cluster.importing.contains(&slot) {
            return None;
        }
        Some(Frame::error(format!("MOVED {slot} {peer}")))
    }

    fn execute(&mut self, session: &mut Session, name: &str, args: &[Bytes]) -> Frame {
        let db = session.db;
        match (name, args.len()) {
            ("PING", 1) => Frame::SimpleString(b"PONG".to_vec()),
            ("PING", 2) | ("ECHO", 2) => Frame::bulk(args[1].clone()),
            ("ASKING", 1) => {
                session.asking = true;
                ok()
            }
            ("CLIENT", n) if n >= 2 => ok(),
            ("SELECT", 2) => match parse::<u32>(&args[1]) {
                Some(index) if index < DATABASES => {
                    session.db = index;
                    ok()
                }
                _ => Frame::error("ERR DB index is out of range"),
            },
            ("GET", 2) => match self.entry(db, &args[1]) {
                Some(Value::Str(value)) => Frame::bulk(value.clone()),
                Some(Value::List(_)) => wrong_type(),
                None => Frame::BulkString(None),
            },
            ("SET", n) if n >= 3 => {
                let ttl = match &args[3..] {
                    [] => None,
                    [unit, amount] => match (unit.to_ascii_uppercase().as_slice(), parse::<u64>(amount)) {
                        (b"EX", Some(secs)) => Some(Duration::from_secs(secs)),
                        (b"PX", Some(ms)) => Some(Duration::from_millis(ms)),
                        _ => return Frame::error("ERR syntax error"),
                    },
                    _ => return Frame::error("ERR syntax error"),
                };
                self.set(db, args[1].clone(), args[2].clone(), ttl);
                ok()
            }
            ("DEL", n) if n >= 2 => {
                let store = self.db(db);
                let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
                Frame::Integer(removed as i64)
            }
            ("EXISTS", n) if n >= 2 => {
                let store = self.db(db);
                let found = args[1..].iter().filter(|key| store.contains_key(*key)).count();
                Frame::Integer(found as i64)
            }
            ("EXPIRE", 3) | ("PEXPIRE", 3) => {
                let Some(amount) = parse::<u64>(&args[2]) else {
                    return not_integer();
                };
                let ttl = if name == "EXPIRE" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                };
                Frame::Integer(i64::from(self.expire(db, &args[1], ttl)))
            }
            ("INCR", 2) => {
                let current = match self.entry(db, &args[1]) {
                    Some(Value::Str(value)) => match parse::<i64>(value) {
                        Some(n) => n,
                        None => return not_integer(),
                    },
                    Some(Value::List(_)) => return wrong_type(),
                    None => 0,
                };
                let next = current + 1;
                let store = self.db(db);
                match store.get_mut(&args[1]) {
                    Some(entry) => entry.value = Value::Str(Bytes::from(next.to_string())),
                    None => {
                        store.insert(args[1].clone(), Entry::new(Value::Str(Bytes::from(next.to_string()))));
                    }
                }
                Frame::Integer(next)
            }
            ("LPOP", 2) => match self.lpop(db, &args[1]) {
                Ok(head) => Frame::BulkString(head),
                Err(reply) => reply,
            },
            ("RPUSH", n) if n >= 3 => match self.rpush(db, &args[1], &args[2..]) {
                Ok(len) => Frame::Integer(len as i64),
                Err(reply) => reply,
            },
            ("LRANGE", 4) => {
                let (Some(start), Some(stop)) = (parse::<i64>(&args[2]), parse::<i64>(&args[3])) else {
                    return not_integer();
                };
                match self.lrange(db, &args[1], start, stop) {
                    Ok(items) => Frame::Array(items.into_iter().map(Frame::bulk).collect()),
                    Err(reply) => reply,
                }
            }
            ("LREM", 4) => {
                let Some(count) = parse::<i64>(&args[2]) else {
                    return not_integer();
                };
                match self.lrem(db, &args[1], count, &args[3]) {
                    Ok(removed) => Frame::Integer(removed as i64),
                    Err(reply) => reply,
                }
            }
            ("PUBLISH", 3) => Frame::Integer(self.publish(&args[1], &args[2])),
            ("EVAL", n) if n >= 3 => {
                let sha = format!("{:x}", Sha1::digest(&args[1]));
                let Some(script) = Lua::recognize(&args[1]) else {
                    return Frame::error("ERR unsupported script");
                };
                self.scripts.insert(sha, script);
                self.eval(db, script, &args[2..])
            }
            ("EVALSHA", n) if n >= 3 => {
                let sha = String::from_utf8_lossy(&args[1]).to_ascii_lowercase();
                match self.scripts.get(&sha).copied() {
                    Some(script) => self.eval(db, script, &args[2..]),
                    None => Frame::error("NOSCRIPT No matching script. Please use EVAL."),
                }
            }
            _ => Frame::error(format!(
                "ERR unknown command '{}', with args beginning with: ",
                name.to_ascii_lowercase()
            )),
        }
    }

    fn set(&mut self, db: u32, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        self.db(db).insert(
            key,
            Entry {
                value: Value::Str(value),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    fn expire(&mut self, db: u32, key: &[u8], ttl: Duration) -> bool {
        match self.db(db).get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    fn list(&mut self, db: u32, key: &[u8]) -> Result<Option<&mut VecDeque<Bytes>>, Frame> {
        match self.entry(db, key) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(Value::Str(_)) => Err(wrong_type()),
            None => Ok(None),
        }
    }

    fn lpop(&mut self, db: u32, key: &[u8]) -> Result<Option<Bytes>, Frame> {
        let head = self.list(db, key)?.and_then(|list| list.pop_front());
        self.drop_if_empty(db, key);
        Ok(head)
    }

    fn rpush(&mut self, db: u32, key: &Bytes, values: &[Bytes]) -> Result<usize, Frame> {
        if self.list(db, key)?.is_none() {
            self.db(db).insert(key.clone(), Entry::new(Value::List(VecDeque::new())));
        }
        let list = self.list(db, key)?.ok_or_else(wrong_type)?;
        list.extend(values.iter().cloned());
        Ok(list.len())
    }

    fn lrange(&mut self, db: u32, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, Frame> {
        let Some(list) = self.list(db, key)? else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let resolve = |index: i64| if index < 0 { len + index } else { index };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    fn lrem(&mut self, db: u32, key: &[u8], count: i64, element: &[u8]) -> Result<usize, Frame> {
        let Some(list) = self.list(db, key)? else {
            return Ok(0);
        };
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0;
        if count >= 0 {
            let mut kept = VecDeque::with_capacity(list.len());
            for item in list.drain(..) {
                if removed < limit && item.as_ref() == element {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
            *list = kept;
        } else {
            let mut kept = VecDeque::with_capacity(list.len());
            for item in list.drain(..).rev() {
                if removed < limit && item.as_ref() == element {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
            *list = kept;
        }
        self.drop_if_empty(db, key);
        Ok(removed)
    }

    fn drop_if_empty(&mut self, db: u32, key: &[u8]) {
        let store = self.db(db);
        if matches!(store.get(key), Some(Entry { value: Value::List(list), .. }) if list.is_empty()) {
            store.remove(key);
        }
    }

    fn get_str(&mut self, db: u32, key: &[u8]) -> Option<Bytes> {
        match self.entry(db, key) {
            Some(Value::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn eval(&mut self, db: u32, script: Lua, rest: &[Bytes]) -> Frame {
        let Some(numkeys) = parse::<usize>(&rest[0]) else {
            return not_integer();
        };
        if rest.len() < 1 + numkeys {
            return Frame::error("ERR Number of keys can't be greater than number of args");
        }
        let keys = &rest[1..1 + numkeys];
        let argv = &rest[1 + numkeys..];

        match script {
            Lua::Return(n) => Frame::Integer(n),
            Lua::Lock => self.lock_script(db, keys, argv),
            Lua::Unlock => {
                let owned = self.get_str(db, &keys[0]).is_some_and(|owner| owner == argv[0]);
                if owned {
                    self.db(db).remove(&keys[0]);
                }
                Frame::Integer(i64::from(owned))
            }
            Lua::Renew => {
                let ttl = parse::<u64>(&argv[0]).map(Duration::from_millis).unwrap_or_default();
                let flags = keys
                    .iter()
                    .zip(&argv[1..])
                    .map(|(key, token)| {
                        let owned = self.get_str(db, key).is_some_and(|owner| owner == *token);
                        if owned {
                            self.expire(db, key, ttl);
                        }
                        Frame::Integer(i64::from(owned))
                    })
                    .collect();
                Frame::Array(flags)
            }
        }
    }

    fn lock_script(&mut self, db: u32, keys: &[Bytes], argv: &[Bytes]) -> Frame {
        let (lock, queue) = (&keys[0], &keys[1]);
        let token = &argv[0];
        let lock_ttl = parse::<u64>(&argv[1]).map(Duration::from_millis).unwrap_or_default();
        let queue_ttl = parse::<u64>(&argv[2]).map(Duration::from_millis).unwrap_or_default();

        let owner = self.get_str(db, lock);
        if owner.as_ref() == Some(token) {
            self.expire(db, lock, lock_ttl);
            return Frame::Integer(1);
        }
        if owner.is_none() {
            let head = match self.lpop(db, queue) {
                Ok(head) => head,
                Err(reply) => return reply,
            };
            match head {
                None => {
                    self.set(db, lock.clone(), token.clone(), Some(lock_ttl));
                    return Frame::Integer(1);
                }
                Some(head) => {
                    let granted = head == *token;
                    self.set(db, lock.clone(), head, Some(lock_ttl));
                    if granted {
                        return Frame::Integer(2);
                    }
                }
            }
        }

        let waiting = match self.lrange(db, queue, 0, -1) {
            Ok(waiting) => waiting,
            Err(reply) => return reply,
        };
        if let Some(index) = waiting.iter().position(|waiter| waiter == token) {
            self.expire(db, queue, queue_ttl);
            return Frame::Integer(-(index as i64 + 1));
        }
        let position = match self.rpush(db, queue, std::slice::from_ref(token)) {
            Ok(position) => position,
            Err(reply) => return reply,
        };
        self.expire(db, queue, queue_ttl);
        Frame::Integer(-(position as i64))
    }

    fn subscribe(&mut self, session: &Session, names: &[Bytes], pattern: bool) -> Vec<Frame> {
        let kind = if pattern { "psubscribe" } else { "subscribe" };
        let listener = self.subscribers.entry(session.id).or_insert_with(|| Listener {
            push: session.push.clone(),
            channels: HashSet::new(),
            patterns: HashSet::new(),
        });
        names
            .iter()
            .map(|name| {
                if pattern {
                    listener.patterns.insert(name.clone());
                } else {
                    listener.channels.insert(name.clone());
                }
                let count = listener.channels.len() + listener.patterns.len();
                push_reply(kind, Some(name.clone()), count)
            })
            .collect()
    }

    fn unsubscribe(&mut self, session: &Session, names: &[Bytes], pattern: bool) -> Vec<Frame> {
        let kind = if pattern { "punsubscribe" } else { "unsubscribe" };
        let Some(listener) = self.subscribers.get_mut(&session.id) else {
            return vec![push_reply(kind, None, 0)];
        };
        let set = if pattern {
            &mut listener.patterns
        } else {
            &mut listener.channels
        };
        let names: Vec<Bytes> = if names.is_empty() {
            set.drain().collect()
        } else {
            names.iter().filter(|name| set.remove(*name)).cloned().collect()
        };

        let mut count = listener.channels.len() + listener.patterns.len();
        if names.is_empty() {
            return vec![push_reply(kind, None, count)];
        }
        let mut replies = Vec::with_capacity(names.len());
        for name in names.into_iter().rev() {
            replies.push(push_reply(kind, Some(name), count));
            count += 1;
        }
        replies.reverse();
        replies
    }

    fn publish(&mut self, channel: &Bytes, payload: &Bytes) -> i64 {
        let name = String::from_utf8_lossy(channel);
        let mut receivers = 0;
        for listener in self.subscribers.values() {
            if listener.channels.contains(channel) {
                let message = Frame::Array(vec![
                    Frame::bulk("message"),
                    Frame::bulk(channel.clone()),
                    Frame::bulk(payload.clone()),
                ]);
                if listener.push.send(message).is_ok() {
                    receivers += 1;
                }
            }
            for pattern in &listener.patterns {
                if glob_match::glob_match(&String::from_utf8_lossy(pattern), &name) {
                    let message = Frame::Array(vec![
                        Frame::bulk("pmessage"),
                        Frame::bulk(pattern.clone()),
                        Frame::bulk(channel.clone()),
                        Frame::bulk(payload.clone()),
                    ]);
                    if listener.push.send(message).is_ok() {
                        receivers += 1;
                    }
                }
            }
        }
        receivers
    }
}

fn push_reply(kind: &str, name: Option<Bytes>, count: usize) -> Frame {
    Frame::Array(vec![
        Frame::bulk(kind.to_string()),
        Frame::BulkString(name),
        Frame::Integer(count as i64),
    ])
}

fn parse<T: std::str::FromStr>(raw: &[u8]) -> Option<T> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn ok() -> Frame {
    Frame::SimpleString(b"OK".to_vec())
}

fn not_integer() -> Frame {
    Frame::error("ERR value is not an integer or out of range")
}

fn wrong_type() -> Frame {
    Frame::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}
