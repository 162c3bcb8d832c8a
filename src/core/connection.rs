use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::core::command::{self, Cmd};
use crate::core::config::LinkConfig;
use crate::core::transport::{Connector, Transport};
use crate::core::{Error, Result};
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;

const READ_CHUNK: usize = 8 * 1024;

/// A connection to a Redis server.
///
/// This struct wraps an underlying stream (TCP, TLS, etc.) and handles
/// RESP frame encoding and decoding.
///
/// # Example
///
/// ```no_run
/// use redlink::proto::frame::Frame;
/// use redlink::Connection;
/// use tokio::net::TcpStream;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let stream = TcpStream::connect("127.0.0.1:6379").await?;
///     let mut conn = Connection::new(stream);
///
///     let cmd = Frame::Array(vec![Frame::bulk("PING")]);
///     conn.write_frame(&cmd).await?;
///
///     let resp = conn.read_frame().await?;
///     println!("{:?}", resp);
///
///     Ok(())
/// }
/// ```
pub struct Connection<S> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: Box<[u8]>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection with the given stream.
    ///
    /// # Arguments
    ///
    /// * `stream` - The underlying async stream (TCP, TLS, etc.)
    pub fn new(stream: S) -> Self {
        Self::with_decoder(stream, Decoder::new())
    }

    /// Creates a connection that rejects frames larger than `max_frame_size`.
    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        Self::with_decoder(stream, Decoder::with_max_frame_size(max_frame_size))
    }

    fn with_decoder(stream: S, decoder: Decoder) -> Self {
        Self {
            stream,
            decoder,
            encoder: Encoder::new(),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Writes a frame to the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.encoder.encode(frame);
        let data = self.encoder.take();
        self.stream.write_all(&data).await?;
        self.stream.flush().await
    }

    /// Writes several pre-encoded commands with a single flush.
    pub async fn write_batch<'a, I>(&mut self, chunks: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a Bytes>,
    {
        let mut buf = BytesMut::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    /// Reads a frame from the connection.
    ///
    /// Waits for incoming data, decodes RESP frames, and returns a complete frame.
    /// Partial frames stay buffered, so dropping the returned future between
    /// reads loses nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or a protocol error occurs
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::Io {
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    ),
                });
            }
            self.decoder.append(&self.read_buf[..n]);
        }
    }

    /// Sends one command and waits for its reply.
    ///
    /// Only valid while nothing else is in flight on this connection.
    pub async fn request(&mut self, cmd: Cmd) -> Result<Frame> {
        self.write_frame(&cmd.into_frame()).await?;
        self.read_frame().await
    }

    /// Runs the connection handshake: AUTH, SELECT, CLIENT SETNAME.
    ///
    /// # Errors
    ///
    /// A rejected AUTH yields [`Error::Auth`], a rejected SELECT yields
    /// [`Error::Server`]. A rejected CLIENT SETNAME is only logged.
    pub async fn handshake(&mut self, config: &LinkConfig, database: Option<u32>) -> Result<()> {
        if let Some(password) = &config.password {
            let cmd = match &config.username {
                Some(username) => {
                    command::auth_with_username(username.clone(), password.clone())
                }
                None => command::auth(password.clone()),
            };
            if let Frame::Error(e) = self.request(cmd).await? {
                return Err(Error::Auth {
                    message: e.message().to_string(),
                });
            }
        }

        if let Some(db) = database {
            if let Frame::Error(e) = self.request(command::select(db)).await? {
                return Err(Error::Server {
                    message: e.message().to_string(),
                });
            }
        }

        if let Some(name) = &config.client_name {
            if let Frame::Error(e) = self.request(command::client_setname(name.clone())).await? {
                warn!(error = %e, "CLIENT SETNAME rejected");
            }
        }

        Ok(())
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("buffered", &!self.decoder.is_empty())
            .finish()
    }
}

/// Opens a transport and runs the handshake once.
pub(crate) async fn establish(
    config: &LinkConfig,
    connector: &Connector,
    database: Option<u32>,
) -> Result<Connection<Transport>> {
    let stream = tokio::time::timeout(config.connect_timeout, connector.connect())
        .await
        .map_err(|_| Error::Io {
            source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        })??;

    let mut conn = Connection::with_max_frame_size(stream, config.max_frame_size);
    conn.handshake(config, database).await?;
    Ok(conn)
}

/// Opens a connection, retrying transport failures with backoff.
///
/// Handshake rejections are returned at once.
pub(crate) async fn connect(
    config: &LinkConfig,
    connector: &Connector,
    database: Option<u32>,
) -> Result<Connection<Transport>> {
    let policy = &config.reconnect;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match establish(config, connector, database).await {
            Ok(conn) => {
                info!(address = %config.address, attempt, "connected");
                return Ok(conn);
            }
            Err(e) if e.is_transport() && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(address = %config.address, attempt, error = %e, ?delay, "connect failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(address = %config.address, attempt, error = %e, "giving up connecting");
                return Err(e);
            }
        }
    }
}
