use bytes::{BufMut, Bytes, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that converts [`Frame`] types and commands to bytes.
///
/// The encoder accumulates data in an internal buffer and can be used
/// to encode multiple frames sequentially.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use redlink::proto::codec::Encoder;
///
/// let mut encoder = Encoder::new();
/// encoder.encode_command(&[Bytes::from("GET"), Bytes::from("foo")]);
/// assert_eq!(&encoder.take()[..], b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
/// ```
#[derive(Debug)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Encodes a frame into the internal buffer using RESP protocol.
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => {
                self.buf.put_u8(b'+');
                self.buf.extend_from_slice(s);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Error(e) => {
                self.buf.put_u8(b'-');
                self.buf.extend_from_slice(e.message().as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                self.put_header(b':', *n);
            }
            Frame::BulkString(Some(data)) => {
                self.put_bulk(data);
            }
            Frame::BulkString(None) => {
                self.buf.extend_from_slice(b"$-1\r\n");
            }
            Frame::Array(a) => {
                self.put_header(b'*', a.len() as i64);
                for item in a {
                    self.encode(item);
                }
            }
            Frame::Null => {
                self.buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Encodes a command: an array of binary-safe bulk strings, the first
    /// being the command name.
    pub fn encode_command(&mut self, args: &[Bytes]) {
        self.put_header(b'*', args.len() as i64);
        for arg in args {
            self.put_bulk(arg);
        }
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    fn put_header(&mut self, tag: u8, n: i64) {
        self.buf.put_u8(tag);
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    fn put_bulk(&mut self, data: &[u8]) {
        self.buf.reserve(data.len() + 16);
        self.put_header(b'$', data.len() as i64);
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
