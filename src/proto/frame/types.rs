use std::fmt;

use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents all frame types defined in the RESP protocol:
/// - SimpleString: Status responses like "OK"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data, possibly null
/// - Array: Command arguments and array responses, nested to any depth
/// - Null: the null array
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(ErrorReply),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar), `None` for the null bulk string ($-1).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null array (*-1).
    Null,
}

/// An error reply sent by the server.
///
/// Keeps the whole error line as the message; the kind is the first
/// whitespace-delimited token (`ERR`, `WRONGTYPE`, `NOSCRIPT`, `MOVED`...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    message: String,
    kind_len: usize,
}

impl ErrorReply {
    /// Parses an error line (without the leading `-` and trailing CRLF).
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind_len = message.find(' ').unwrap_or(message.len());
        Self { message, kind_len }
    }

    /// The error kind token, e.g. `NOSCRIPT`.
    pub fn kind(&self) -> &str {
        &self.message[..self.kind_len]
    }

    /// The full error line.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The text after the kind token.
    pub fn detail(&self) -> &str {
        self.message[self.kind_len..].trim_start()
    }

    /// Returns true if the kind matches `kind`, ignoring ASCII case.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind().eq_ignore_ascii_case(kind)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Frame {
    /// Builds a bulk string frame.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Builds an error frame from a full error line.
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(ErrorReply::new(message))
    }

    /// Returns the error reply if this frame is an error.
    pub fn as_error(&self) -> Option<&ErrorReply> {
        match self {
            Frame::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the payload of a simple or non-null bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::SimpleString(s) => Some(s),
            Frame::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract an integer from this frame.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Consumes the frame and returns its elements if it is a non-null array.
    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns true for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }
}

#[cfg(test)]
impl Frame {
    /// Converts the frame to a human-readable string representation.
    pub fn to_string(&self) -> Option<String> {
        match self {
            Frame::SimpleString(s) => String::from_utf8(s.clone()).ok(),
            Frame::Error(e) => Some(e.message().to_string()),
            Frame::Integer(i) => Some(i.to_string()),
            Frame::BulkString(b) => b.as_ref().map(|s| String::from_utf8_lossy(s).into_owned()),
            Frame::Array(a) => Some(format!(
                "[{}]",
                a.iter()
                    .filter_map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Frame::Null => Some("nil".to_string()),
        }
    }
}
