use std::time::Duration;

use crate::core::config::{LinkConfig, ReconnectPolicy};
use crate::{Client, Error};

/// Builder for configuring and creating a [`Client`] connection.
///
/// # Example
///
/// ```no_run
/// use redlink::ClientBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new()
///     .address("redis://localhost:6379")
///     .password("secret")
///     .database(0)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    address: Option<String>,
    password: Option<String>,
    username: Option<String>,
    database: Option<u32>,
    client_name: Option<String>,
    connection_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    tls: bool,
    queue_size: Option<usize>,
    reconnect: Option<ReconnectPolicy>,
    idle_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Redis server address.
    ///
    /// # Arguments
    ///
    /// * `address` - Any URI accepted by [`LinkConfig::from_uri`]
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the password for authentication.
    ///
    /// # Arguments
    ///
    /// * `password` - Password string
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the username for ACL authentication.
    ///
    /// # Arguments
    ///
    /// * `username` - Username string
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the Redis database number to select after connection.
    ///
    /// # Arguments
    ///
    /// * `database` - Database number
    #[inline]
    pub fn database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the client connection name.
    ///
    /// # Arguments
    ///
    /// * `name` - Client name displayed in `CLIENT LIST`
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the connection timeout.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for connection establishment
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the read timeout for commands.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for a response. `None` means no timeout.
    #[inline]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Enables or disables TLS encryption.
    ///
    /// # Arguments
    ///
    /// * `enabled` - `true` to use TLS, `false` for plaintext
    #[inline]
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Sets the maximum number of queued requests.
    ///
    /// # Arguments
    ///
    /// * `size` - Maximum number of requests (default: 1024)
    #[inline]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    /// Sets how the link retries after transport failures.
    #[inline]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Sets how long an unreferenced link stays connected while idle.
    #[inline]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Builds the link configuration without connecting.
    ///
    /// Settings given to the builder override those found in the address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if address is not set, and
    /// [`Error::Config`] if it cannot be parsed.
    pub fn config(self) -> Result<LinkConfig, Error> {
        let address = self.address.ok_or_else(|| Error::InvalidArgument {
            message: "address is required".to_string(),
        })?;

        let mut config = LinkConfig::from_uri(&address)?;
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.username.is_some() {
            config.username = self.username;
        }
        if self.database.is_some() {
            config.database = self.database;
        }
        if self.client_name.is_some() {
            config.client_name = self.client_name;
        }
        if let Some(timeout) = self.connection_timeout {
            config.connect_timeout = timeout;
        }
        if self.read_timeout.is_some() {
            config.read_timeout = self.read_timeout;
        }
        config.tls |= self.tls;
        if let Some(size) = self.queue_size {
            config.queue_size = size;
        }
        if let Some(policy) = self.reconnect {
            config.reconnect = policy;
        }
        if let Some(timeout) = self.idle_timeout {
            config.idle_timeout = timeout;
        }
        Ok(config)
    }

    /// Builds the [`Client`] connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if address is not set.
    /// Returns [`Error::Io`] if connection fails.
    #[inline]
    pub async fn build(self) -> Result<Client, Error> {
        Client::with_config(self.config()?).await
    }
}
