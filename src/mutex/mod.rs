//! # Redlink Mutex
//!
//! A fair distributed lock built from Lua scripts.
//!
//! Each lock is a key holding the owner's fencing token with a lease TTL.
//! Callers that find the lock taken join a FIFO queue stored next to it; when
//! the lock frees up, the head of the queue is granted the lock before anyone
//! else can take it. Held leases are renewed by a background task.
//!
//! The lock key and the queue key share a hash tag, so both live in the same
//! cluster slot and the scripts run on any [`Executor`]: a [`Link`], a
//! [`Client`] or a [`ClusterClient`].
//!
//! [`Link`]: crate::Link
//! [`Client`]: crate::Client
//! [`ClusterClient`]: crate::ClusterClient
//!
//! ## Example
//!
//! ```no_run
//! use redlink::{Client, Mutex, MutexOptions};
//!
//! # async fn example() -> redlink::Result<()> {
//! let client = Client::connect("redis://127.0.0.1:6379").await?;
//! let mutex = Mutex::new(client, MutexOptions::default());
//!
//! let lock = mutex.lock("reports").await?;
//! // ... exclusive work ...
//! lock.release().await?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod scripts;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::core::command;
use crate::core::script::Script;
use crate::core::{Error, Executor, Result};
use crate::proto::frame::Frame;

/// What happens when a held lock cannot be renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalFailure {
    /// Log the failure and keep treating the lock as held.
    #[default]
    Log,
    /// Drop the lock and signal its holder through [`Lock::lost`].
    Surface,
}

/// Tuning for a [`Mutex`].
#[derive(Debug, Clone)]
pub struct MutexOptions {
    /// Prefix for every key the mutex creates.
    pub prefix: String,
    /// Lease length of a held lock.
    pub lock_ttl: Duration,
    /// Lifetime of an idle wait queue.
    pub queue_ttl: Duration,
    /// How long [`Mutex::lock`] waits before giving up.
    pub timeout: Duration,
    /// Shortest wait between attempts.
    pub min_delay: Duration,
    /// Extra wait per position in the queue.
    pub delay_step: Duration,
    /// Longest wait between attempts.
    pub max_delay: Duration,
    /// Renewal period; defaults to a third of `lock_ttl`.
    pub renew_interval: Option<Duration>,
    /// Renewal failure policy.
    pub on_renewal_failure: RenewalFailure,
}

impl MutexOptions {
    fn backoff(&self, position: u64) -> Duration {
        let position = u32::try_from(position).unwrap_or(u32::MAX);
        self.delay_step
            .saturating_mul(position)
            .min(self.max_delay)
            .max(self.min_delay)
    }

    fn renew_interval(&self) -> Duration {
        self.renew_interval
            .unwrap_or(self.lock_ttl / 3)
            .max(Duration::from_millis(1))
    }
}

impl Default for MutexOptions {
    fn default() -> Self {
        Self {
            prefix: "redlink:".to_string(),
            lock_ttl: Duration::from_secs(10),
            queue_ttl: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            min_delay: Duration::from_millis(10),
            delay_step: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            renew_interval: None,
            on_renewal_failure: RenewalFailure::Log,
        }
    }
}

struct Record {
    token: String,
    expires_at: Instant,
    lost: watch::Sender<bool>,
}

struct Inner<E> {
    executor: E,
    options: MutexOptions,
    lock_script: Script,
    unlock_script: Script,
    renew_script: Script,
    held: std::sync::Mutex<HashMap<String, Record>>,
}

/// A fair distributed mutex.
///
/// Clones share the set of held locks and the renewal task.
pub struct Mutex<E: Executor + 'static> {
    inner: Arc<Inner<E>>,
}

impl<E: Executor + 'static> Clone for Mutex<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Executor + 'static> fmt::Debug for Mutex<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("options", &self.inner.options)
            .field("held", &self.inner.held().len())
            .finish()
    }
}

impl<E: Executor + 'static> Mutex<E> {
    /// Creates a mutex over `executor` and starts its renewal task.
    ///
    /// Must be called within a tokio runtime. The renewal task ends once
    /// every clone of the mutex and every lock it handed out is dropped.
    pub fn new(executor: E, options: MutexOptions) -> Self {
        let period = options.renew_interval();
        let inner = Arc::new(Inner {
            executor,
            options,
            lock_script: Script::new(scripts::LOCK),
            unlock_script: Script::new(scripts::UNLOCK),
            renew_script: Script::new(scripts::RENEW),
            held: std::sync::Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("mutex dropped, stopping renewal");
                    break;
                };
                inner.renew().await;
            }
        });

        Self { inner }
    }

    /// Acquires the lock for `key`, waiting in line behind earlier callers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the lock was not granted within
    /// the configured timeout. The caller's place in the queue is given up
    /// before returning.
    #[instrument(skip(self))]
    pub async fn lock(&self, key: &str) -> Result<Lock<E>> {
        let inner = &self.inner;
        let options = &inner.options;
        let token = Uuid::new_v4().to_string();
        let keys = [
            Bytes::from(inner.lock_key(key)),
            Bytes::from(inner.queue_key(key)),
        ];
        let args = [
            Bytes::from(token.clone()),
            millis(options.lock_ttl),
            millis(options.queue_ttl),
        ];
        let deadline = Instant::now() + options.timeout;

        loop {
            let started = Instant::now();
            let reply = inner.lock_script.invoke(&inner.executor, &keys, &args).await;
            let position = match reply {
                Ok(Frame::Integer(n)) if n > 0 => {
                    debug!(key, from_queue = n == 2, "lock acquired");
                    return Ok(self.register(key, token, started));
                }
                Ok(Frame::Integer(n)) => n.unsigned_abs(),
                Ok(other) => {
                    inner.abandon(key, &token).await;
                    return Err(match other {
                        Frame::Error(e) => command::server_error(&e),
                        other => Error::Protocol {
                            message: format!("unexpected lock reply: {other:?}"),
                        },
                    });
                }
                Err(e) => {
                    inner.abandon(key, &token).await;
                    return Err(e);
                }
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(key, timeout = ?options.timeout, "timed out waiting for lock");
                inner.abandon(key, &token).await;
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                    timeout: options.timeout,
                });
            }

            let delay = options.backoff(position).min(deadline - now);
            debug!(key, position, ?delay, "lock busy, waiting");
            sleep(delay).await;
        }
    }

    /// Releases `lock`.
    ///
    /// Releasing a lock that already expired is logged, not an error.
    /// Dropping the lock afterwards does nothing further.
    pub async fn unlock(&self, lock: &Lock<E>) -> Result<()> {
        lock.released.store(true, Ordering::Release);
        self.inner.release(&lock.key, &lock.token).await
    }

    /// Keys of the locks currently held through this mutex.
    pub fn held_keys(&self) -> Vec<String> {
        self.inner.held().keys().cloned().collect()
    }

    fn register(&self, key: &str, token: String, started: Instant) -> Lock<E> {
        let (lost_tx, lost) = watch::channel(false);
        self.inner.held().insert(
            key.to_string(),
            Record {
                token: token.clone(),
                expires_at: started + self.inner.options.lock_ttl,
                lost: lost_tx,
            },
        );
        Lock {
            mutex: self.clone(),
            key: key.to_string(),
            token,
            lost,
            released: AtomicBool::new(false),
        }
    }
}

impl<E: Executor + 'static> Inner<E> {
    fn held(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}lock:{{{}}}", self.options.prefix, key)
    }

    fn queue_key(&self, key: &str) -> String {
        format!("{}lock-queue:{{{}}}", self.options.prefix, key)
    }

    /// Removes the record for `key` if it belongs to `token`.
    fn forget(&self, key: &str, token: &str) -> Option<Record> {
        let mut held = self.held();
        if held.get(key).is_some_and(|record| record.token == token) {
            held.remove(key)
        } else {
            None
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        self.forget(key, token);
        let keys = [Bytes::from(self.lock_key(key))];
        let args = [Bytes::from(token.to_string())];

        match self.unlock_script.invoke(&self.executor, &keys, &args).await? {
            Frame::Integer(1) => {
                debug!(key, "lock released");
                Ok(())
            }
            Frame::Integer(_) => {
                warn!(key, "lock expired or changed hands before release");
                Ok(())
            }
            Frame::Error(e) => Err(command::server_error(&e)),
            other => Err(Error::Protocol {
                message: format!("unexpected unlock reply: {other:?}"),
            }),
        }
    }

    /// Leaves the queue and undoes a grant that may have raced the caller
    /// giving up.
    async fn abandon(&self, key: &str, token: &str) {
        let dequeue = command::lrem(self.queue_key(key), 0, token.to_string());
        if let Err(e) = self.executor.execute(dequeue).await {
            warn!(key, error = %e, "failed to leave lock queue");
        }
        let keys = [Bytes::from(self.lock_key(key))];
        let args = [Bytes::from(token.to_string())];
        if let Err(e) = self.unlock_script.invoke(&self.executor, &keys, &args).await {
            warn!(key, error = %e, "failed to clear abandoned lock");
        }
    }

    async fn renew(&self) {
        let snapshot: Vec<(String, String)> = self
            .held()
            .iter()
            .map(|(key, record)| (key.clone(), record.token.clone()))
            .collect();
        if snapshot.is_empty() {
            return;
        }

        let mut groups: BTreeMap<u16, Vec<(String, String)>> = BTreeMap::new();
        for (key, token) in snapshot {
            let group = self.executor.renewal_group(self.lock_key(&key).as_bytes());
            groups.entry(group).or_default().push((key, token));
        }

        let ttl = self.options.lock_ttl;
        for group in groups.into_values() {
            let keys: Vec<Bytes> = group
                .iter()
                .map(|(key, _)| Bytes::from(self.lock_key(key)))
                .collect();
            let mut args = vec![millis(ttl)];
            args.extend(group.iter().map(|(_, token)| Bytes::from(token.clone())));

            let started = Instant::now();
            match self.renew_script.invoke(&self.executor, &keys, &args).await {
                Ok(Frame::Array(flags)) if flags.len() == group.len() => {
                    for ((key, token), flag) in group.iter().zip(flags) {
                        if flag.as_int() == Some(1) {
                            self.extend(key, token, started + ttl);
                        } else {
                            self.renewal_failed(key, token, "token no longer matches");
                        }
                    }
                }
                Ok(other) => {
                    warn!(reply = ?other, "unexpected renewal reply");
                    self.check_lapsed(&group);
                }
                Err(e) => {
                    warn!(error = %e, locks = group.len(), "lock renewal failed");
                    self.check_lapsed(&group);
                }
            }
        }
    }

    fn extend(&self, key: &str, token: &str, expires_at: Instant) {
        if let Some(record) = self.held().get_mut(key) {
            if record.token == token {
                record.expires_at = expires_at;
            }
        }
    }

    fn check_lapsed(&self, group: &[(String, String)]) {
        let now = Instant::now();
        for (key, token) in group {
            let lapsed = self
                .held()
                .get(key)
                .is_some_and(|record| record.token == *token && record.expires_at <= now);
            if lapsed {
                self.renewal_failed(key, token, "lease lapsed");
            }
        }
    }

    fn renewal_failed(&self, key: &str, token: &str, reason: &str) {
        match self.options.on_renewal_failure {
            RenewalFailure::Log => warn!(key, reason, "could not renew lock"),
            RenewalFailure::Surface => {
                warn!(key, reason, "lock lost");
                if let Some(record) = self.forget(key, token) {
                    record.lost.send_replace(true);
                }
            }
        }
    }
}

/// A held lock.
///
/// Dropping a lock without [`release`](Lock::release) stops its renewal and
/// releases it in the background.
pub struct Lock<E: Executor + 'static> {
    mutex: Mutex<E>,
    key: String,
    token: String,
    lost: watch::Receiver<bool>,
    released: AtomicBool,
}

impl<E: Executor + 'static> Lock<E> {
    /// The key passed to [`Mutex::lock`].
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fencing token stored in the lock key.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns true once a renewal failure was surfaced for this lock.
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Resolves when the lock is reported lost.
    ///
    /// Only fires with [`RenewalFailure::Surface`].
    pub async fn lost(&self) {
        let mut lost = self.lost.clone();
        if lost.wait_for(|lost| *lost).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Fails with [`Error::LockLost`] if the lock was reported lost.
    pub fn check(&self) -> Result<()> {
        if self.is_lost() {
            return Err(Error::LockLost {
                key: self.key.clone(),
            });
        }
        Ok(())
    }

    /// Releases the lock. Same as [`Mutex::unlock`].
    pub async fn release(self) -> Result<()> {
        self.mutex.unlock(&self).await
    }
}

impl<E: Executor + 'static> Drop for Lock<E> {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        self.mutex.inner.forget(&self.key, &self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.mutex.inner.clone();
            let key = self.key.clone();
            let token = self.token.clone();
            handle.spawn(async move {
                if let Err(e) = inner.release(&key, &token).await {
                    warn!(key, error = %e, "background lock release failed");
                }
            });
        }
    }
}

impl<E: Executor + 'static> fmt::Debug for Lock<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("lost", &self.is_lost())
            .finish()
    }
}

fn millis(duration: Duration) -> Bytes {
    Bytes::from(
        i64::try_from(duration.as_millis())
            .unwrap_or(i64::MAX)
            .to_string(),
    )
}
