//! Link configuration and URI parsing.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::core::transport::Connector;
use crate::core::{Error, Result};

const DEFAULT_PORT: u16 = 6379;

/// Where a link connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// A TCP endpoint.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// A Unix domain socket path.
    Unix(PathBuf),
}

impl Address {
    /// Parses a `host:port` pair, as found in cluster redirects.
    ///
    /// IPv6 hosts may be bracketed (`[::1]:7000`).
    pub fn parse_host_port(address: &str) -> Result<Self> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| Error::InvalidArgument {
            message: format!("expected host:port, got {address:?}"),
        })?;
        let port = port.parse::<u16>().map_err(|_| Error::InvalidArgument {
            message: format!("invalid port in {address:?}"),
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(Error::InvalidArgument {
                message: format!("missing host in {address:?}"),
            });
        }
        Ok(Address::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Address::Tcp { host, port } => write!(f, "{host}:{port}"),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// How a link retries after transport failures.
///
/// The delay before attempt `n` is `base_delay * 2^(n-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failures tolerated before the link stops.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// The backoff delay after `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Everything a link needs to open and maintain its connection.
#[derive(Clone)]
pub struct LinkConfig {
    /// Server address.
    pub address: Address,
    /// Wrap the TCP stream in TLS.
    pub tls: bool,
    /// ACL username.
    pub username: Option<String>,
    /// Password sent with AUTH.
    pub password: Option<String>,
    /// Database selected after connecting.
    pub database: Option<u32>,
    /// Name announced with CLIENT SETNAME.
    pub client_name: Option<String>,
    /// Time allowed for opening the transport.
    pub connect_timeout: Duration,
    /// Time allowed for the server to start answering outstanding requests.
    pub read_timeout: Option<Duration>,
    /// Reconnect behaviour.
    pub reconnect: ReconnectPolicy,
    /// Delay before an unreferenced, idle link closes its connection.
    pub idle_timeout: Duration,
    /// Capacity of the request channel.
    pub queue_size: usize,
    /// Largest accepted frame.
    pub max_frame_size: usize,
    /// Capacity of each subscription's message buffer.
    pub subscription_buffer: usize,
    /// Custom transport, overriding `address` and `tls`.
    pub connector: Option<Connector>,
}

impl LinkConfig {
    /// A configuration for a plain TCP endpoint with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_address(Address::Tcp {
            host: host.into(),
            port,
        })
    }

    /// A configuration for `address` with default settings.
    pub fn with_address(address: Address) -> Self {
        Self {
            address,
            tls: false,
            username: None,
            password: None,
            database: None,
            client_name: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: None,
            reconnect: ReconnectPolicy::default(),
            idle_timeout: Duration::from_secs(30),
            queue_size: 1024,
            max_frame_size: 512 * 1024 * 1024,
            subscription_buffer: 64,
            connector: None,
        }
    }

    /// Parses a connection URI.
    ///
    /// Accepted forms:
    ///
    /// - `redis://[[user]:password@]host[:port][/db]`
    /// - `rediss://...` (TLS)
    /// - `tcp://host:port`
    /// - `unix:///path/to/redis.sock`
    ///
    /// Each form accepts the query parameters `password`, `database` and
    /// `timeout` (connect timeout in seconds). Giving the password or
    /// database both in the URI body and in the query is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed URIs, unknown schemes and
    /// conflicting settings.
    ///
    /// # Example
    ///
    /// ```
    /// use redlink::LinkConfig;
    ///
    /// let config = LinkConfig::from_uri("redis://:secret@localhost:6380/2").unwrap();
    /// assert_eq!(config.password.as_deref(), Some("secret"));
    /// assert_eq!(config.database, Some(2));
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| config_error(format!("invalid URI {uri:?}: {e}")))?;

        let mut config = match url.scheme() {
            "redis" | "rediss" | "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| config_error(format!("missing host in {uri:?}")))?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                let mut config =
                    LinkConfig::new(host, url.port().unwrap_or(DEFAULT_PORT));
                config.tls = url.scheme() == "rediss";
                if !url.username().is_empty() {
                    config.username = Some(decode_credential(url.username())?);
                }
                config.password = url.password().map(decode_credential).transpose()?;
                config.database = parse_database_path(url.path())?;
                config
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(config_error(format!("missing socket path in {uri:?}")));
                }
                LinkConfig::with_address(Address::Unix(PathBuf::from(path)))
            }
            scheme => return Err(config_error(format!("unsupported scheme {scheme:?}"))),
        };

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(password) = query.get("password") {
            if config.password.is_some() {
                return Err(config_error("password given both in the URI and the query"));
            }
            config.password = Some(password.clone());
        }

        if let Some(database) = query.get("database") {
            if config.database.is_some() {
                return Err(config_error("database given both in the path and the query"));
            }
            config.database = Some(parse_database(database)?);
        }

        if let Some(timeout) = query.get("timeout") {
            let seconds = timeout
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| config_error(format!("invalid timeout {timeout:?}")))?;
            config.connect_timeout = Duration::from_secs_f64(seconds);
        }

        Ok(config)
    }
}

impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("address", &self.address)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("client_name", &self.client_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("reconnect", &self.reconnect)
            .field("idle_timeout", &self.idle_timeout)
            .field("queue_size", &self.queue_size)
            .field("max_frame_size", &self.max_frame_size)
            .field("subscription_buffer", &self.subscription_buffer)
            .field("connector", &self.connector)
            .finish()
    }
}

/// Undoes the percent-encoding `url` keeps in user names and passwords.
fn decode_credential(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| config_error("credentials in the URI are not valid UTF-8"))
}

fn parse_database_path(path: &str) -> Result<Option<u32>> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Ok(None);
    }
    parse_database(path).map(Some)
}

fn parse_database(value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| config_error(format!("invalid database {value:?}")))
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}
