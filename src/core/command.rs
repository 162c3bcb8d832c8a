use std::time::Duration;

use bytes::Bytes;

use crate::core::Error;
use crate::proto::codec::Encoder;
use crate::proto::frame::{ErrorReply, Frame};

/// Commands that never carry a key in their first argument.
const KEYLESS: &[&str] = &[
    "ASKING", "AUTH", "CLIENT", "CLUSTER", "CONFIG", "DBSIZE", "ECHO", "FLUSHALL", "FLUSHDB",
    "INFO", "PING", "SCRIPT", "SELECT",
];

/// A command ready to be sent to Redis.
///
/// Commands are built using the builder pattern and encoded as an array of
/// bulk strings, so arguments may contain arbitrary bytes.
///
/// # Example
///
/// ```
/// use redlink::Cmd;
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.name(), b"SET");
/// assert_eq!(cmd.routing_key(), Some(&b"key"[..]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - The command name (e.g., "GET", "SET", "DEL")
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every item of `args`.
    #[inline]
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command name as given.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Returns true if the command name matches `name`, ignoring ASCII case.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    /// The arguments after the command name.
    pub fn arguments(&self) -> &[Bytes] {
        &self.args[1..]
    }

    /// The key used to route this command in a cluster.
    ///
    /// This is the first argument, except for `EVAL`/`EVALSHA` where it is
    /// the first key after `numkeys`. Commands without keys return `None`.
    pub fn routing_key(&self) -> Option<&[u8]> {
        if self.is("EVAL") || self.is("EVALSHA") {
            let numkeys: usize = std::str::from_utf8(self.args.get(2)?).ok()?.parse().ok()?;
            if numkeys == 0 {
                return None;
            }
            return self.args.get(3).map(|k| &k[..]);
        }
        if KEYLESS.iter().any(|name| self.is(name)) {
            return None;
        }
        self.args.get(1).map(|k| &k[..])
    }

    /// Encodes the command into its wire form.
    pub fn to_bytes(&self) -> Bytes {
        let mut encoder = Encoder::new();
        encoder.encode_command(&self.args);
        encoder.take().freeze()
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates an ECHO command.
#[inline]
pub fn echo(msg: impl Into<Bytes>) -> Cmd {
    Cmd::new("ECHO").arg(msg)
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a SET command with a millisecond expiration.
#[inline]
pub fn set_with_expiry(key: impl Into<Bytes>, value: impl Into<Bytes>, expiry: Duration) -> Cmd {
    Cmd::new("SET")
        .arg(key)
        .arg(value)
        .arg("PX")
        .arg(expiry.as_millis().to_string())
}

/// Creates a DEL command.
#[inline]
pub fn del(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DEL").arg(key)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("EXISTS").arg(key)
}

/// Creates an EXPIRE command.
#[inline]
pub fn expire(key: impl Into<Bytes>, seconds: u64) -> Cmd {
    Cmd::new("EXPIRE").arg(key).arg(seconds.to_string())
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates an LREM command.
#[inline]
pub fn lrem(key: impl Into<Bytes>, count: i64, element: impl Into<Bytes>) -> Cmd {
    Cmd::new("LREM").arg(key).arg(count.to_string()).arg(element)
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a SELECT command.
#[inline]
pub fn select(db: u32) -> Cmd {
    Cmd::new("SELECT").arg(db.to_string())
}

/// Creates a CLIENT SETNAME command.
#[inline]
pub fn client_setname(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("CLIENT").arg("SETNAME").arg(name)
}

/// Creates a PUBLISH command.
#[inline]
pub fn publish(channel: impl Into<Bytes>, message: impl Into<Bytes>) -> Cmd {
    Cmd::new("PUBLISH").arg(channel).arg(message)
}

/// Creates an EVAL command.
pub fn eval(script: impl Into<Bytes>, keys: &[Bytes], args: &[Bytes]) -> Cmd {
    Cmd::new("EVAL")
        .arg(script)
        .arg(keys.len().to_string())
        .args(keys.iter().cloned())
        .args(args.iter().cloned())
}

/// Creates an EVALSHA command.
pub fn evalsha(sha: impl Into<Bytes>, keys: &[Bytes], args: &[Bytes]) -> Cmd {
    Cmd::new("EVALSHA")
        .arg(sha)
        .arg(keys.len().to_string())
        .args(keys.iter().cloned())
        .args(args.iter().cloned())
}

/// Converts an error reply into a typed error.
///
/// With the `cluster` feature, redirects and cluster states map to their
/// dedicated variants.
pub fn server_error(reply: &ErrorReply) -> Error {
    #[cfg(feature = "cluster")]
    {
        crate::cluster::parse_redis_error(reply.message())
    }
    #[cfg(not(feature = "cluster"))]
    {
        Error::Server {
            message: reply.message().to_string(),
        }
    }
}

/// Turns error replies into errors and passes every other frame through.
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame, Error> {
    match frame {
        Frame::Error(e) => Err(server_error(&e)),
        _ => Ok(frame),
    }
}

/// Converts a frame to bytes.
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>, Error> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

/// Converts a frame to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64, Error> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

/// Converts a frame to a boolean.
#[inline]
pub fn frame_to_bool(frame: Frame) -> Result<bool, Error> {
    match frame {
        Frame::Integer(i) => Ok(i != 0),
        Frame::BulkString(b) => Ok(b.map_or(false, |bytes| !bytes.is_empty())),
        Frame::Error(e) => Err(server_error(&e)),
        _ => Err(Error::Protocol {
            message: "unexpected frame type".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_into_frame() {
        let cmd = Cmd::new("GET").arg("key");
        assert_eq!(
            cmd.into_frame(),
            Frame::Array(vec![
                Frame::BulkString(Some("GET".into())),
                Frame::BulkString(Some("key".into()))
            ])
        );
    }

    #[test]
    fn test_cmd_to_bytes() {
        let cmd = set("foo", "bar");
        assert_eq!(
            &cmd.to_bytes()[..],
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"
        );
    }

    #[test]
    fn test_set_with_expiry_cmd() {
        let cmd = set_with_expiry("key", "value", Duration::from_secs(2));
        assert_eq!(
            cmd.arguments(),
            &[
                Bytes::from("key"),
                Bytes::from("value"),
                Bytes::from("PX"),
                Bytes::from("2000")
            ]
        );
    }

    #[test]
    fn test_routing_key() {
        assert_eq!(get("foo").routing_key(), Some(&b"foo"[..]));
        assert_eq!(ping().routing_key(), None);
        assert_eq!(Cmd::new("ping").arg("hi").routing_key(), None);
        assert_eq!(select(2).routing_key(), None);
    }

    #[test]
    fn test_routing_key_for_scripts() {
        let keys = [Bytes::from("lock"), Bytes::from("queue")];
        let cmd = evalsha("abc", &keys, &[Bytes::from("token")]);
        assert_eq!(cmd.routing_key(), Some(&b"lock"[..]));

        let cmd = eval("return 1", &[], &[Bytes::from("x")]);
        assert_eq!(cmd.routing_key(), None);
    }

    #[test]
    fn test_eval_cmd() {
        let cmd = eval("return 1", &[Bytes::from("k")], &[Bytes::from("a")]);
        assert_eq!(
            cmd.into_frame(),
            Frame::Array(vec![
                Frame::bulk("EVAL"),
                Frame::bulk("return 1"),
                Frame::bulk("1"),
                Frame::bulk("k"),
                Frame::bulk("a"),
            ])
        );
    }

    #[test]
    fn test_cmd_is_case_insensitive() {
        assert!(Cmd::new("select").is("SELECT"));
        assert!(!Cmd::new("SET").is("SELECT"));
    }

    #[test]
    fn test_lrem_cmd() {
        let cmd = lrem("queue", 0, "token");
        assert_eq!(
            cmd.arguments(),
            &[Bytes::from("queue"), Bytes::from("0"), Bytes::from("token")]
        );
    }

    #[test]
    fn test_parse_frame_response_error() {
        let result = parse_frame_response(Frame::error("ERR boom"));
        match result {
            Err(Error::Server { message }) => assert_eq!(message, "ERR boom"),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_to_bytes() {
        assert_eq!(
            frame_to_bytes(Frame::bulk("bar")).unwrap(),
            Some(Bytes::from("bar"))
        );
        assert_eq!(frame_to_bytes(Frame::BulkString(None)).unwrap(), None);
        assert!(frame_to_bytes(Frame::Integer(1)).is_err());
    }

    #[test]
    fn test_frame_to_int() {
        assert_eq!(frame_to_int(Frame::Integer(5)).unwrap(), 5);
        assert_eq!(frame_to_int(Frame::bulk("12")).unwrap(), 12);
        assert!(frame_to_int(Frame::bulk("x")).is_err());
    }

    #[test]
    fn test_frame_to_bool() {
        assert!(frame_to_bool(Frame::Integer(1)).unwrap());
        assert!(!frame_to_bool(Frame::Integer(0)).unwrap());
    }
}
