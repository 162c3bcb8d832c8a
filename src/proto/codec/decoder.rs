use bytes::{Buf, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::{ErrorReply, Frame};

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// What the decoder is waiting for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// A type byte followed by a CRLF-terminated header line.
    Line,
    /// The payload of a bulk string plus its trailing CRLF.
    Bulk(usize),
}

/// An array whose elements are still being decoded.
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<Frame>,
}

/// A resumable RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder keeps its position across calls: a frame whose header and
/// payload arrive in separate reads, or several frames arriving in a single
/// read, decode exactly as if the bytes had arrived at once. Nested arrays
/// are tracked on an explicit stack rather than by recursion.
///
/// # Example
///
/// ```
/// use redlink::proto::codec::Decoder;
/// use redlink::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// let frames = decoder.feed(b"+foo\r\n+bar\r\n").unwrap();
/// assert_eq!(
///     frames,
///     vec![
///         Frame::SimpleString(b"foo".to_vec()),
///         Frame::SimpleString(b"bar".to_vec()),
///     ]
/// );
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    state: State,
    stack: Vec<PartialArray>,
    scanned: usize,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes for a bulk payload or header line
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Line,
            stack: Vec::new(),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Appends raw bytes to the internal buffer.
    ///
    /// Call this method when new data arrives from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Appends `data` and returns every frame it completes, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed. The decoder must not be
    /// used afterwards.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, DecodeError> {
        self.append(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Returns true if no partially decoded frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.stack.is_empty() && self.state == State::Line
    }

    /// Attempts to decode one complete frame from the buffer.
    ///
    /// Returns `Ok(Some(Frame))` if a complete frame was decoded.
    /// Returns `Ok(None)` if more data is needed; progress made so far is kept.
    /// Returns `Err(...)` if the data is malformed.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        loop {
            let frame = match self.state {
                State::Line => {
                    let end = match self.find_crlf()? {
                        Some(end) => end,
                        None => return Ok(None),
                    };
                    let line = self.buf.split_to(end);
                    self.buf.advance(2);
                    self.scanned = 0;
                    match self.parse_line(&line)? {
                        Some(frame) => frame,
                        None => continue,
                    }
                }
                State::Bulk(len) => {
                    if self.buf.len() < len + 2 {
                        self.buf.reserve(len + 2 - self.buf.len());
                        return Ok(None);
                    }
                    let data = self.buf.split_to(len).freeze();
                    if &self.buf[..2] != b"\r\n" {
                        return Err(DecodeError::new("bulk string not terminated by CRLF"));
                    }
                    self.buf.advance(2);
                    self.state = State::Line;
                    Frame::BulkString(Some(data))
                }
            };

            if let Some(frame) = self.complete(frame) {
                return Ok(Some(frame));
            }
        }
    }

    /// Interprets a header line. Returns `None` when the line opened a bulk
    /// string or a non-empty array whose contents are still to come.
    fn parse_line(&mut self, line: &[u8]) -> Result<Option<Frame>, DecodeError> {
        let (&tag, rest) = line
            .split_first()
            .ok_or_else(|| DecodeError::new("empty frame header"))?;

        match tag {
            b'+' => Ok(Some(Frame::SimpleString(rest.to_vec()))),
            b'-' => Ok(Some(Frame::Error(ErrorReply::new(
                String::from_utf8_lossy(rest).into_owned(),
            )))),
            b':' => parse_int(rest).map(|n| Some(Frame::Integer(n))),
            b'$' => {
                let len = parse_int(rest)?;
                if len == -1 {
                    return Ok(Some(Frame::BulkString(None)));
                }
                let len = usize::try_from(len)
                    .map_err(|_| DecodeError::new(format!("invalid bulk string length: {len}")))?;
                if len > self.max_frame_size {
                    return Err(DecodeError::new(
                        "Bulk string length exceeds maximum frame size",
                    ));
                }
                self.state = State::Bulk(len);
                Ok(None)
            }
            b'*' => {
                let count = parse_int(rest)?;
                if count == -1 {
                    return Ok(Some(Frame::Null));
                }
                let count = usize::try_from(count)
                    .map_err(|_| DecodeError::new(format!("invalid array length: {count}")))?;
                if count == 0 {
                    return Ok(Some(Frame::Array(Vec::new())));
                }
                // Assume minimum 16 bytes per item
                if count > self.max_frame_size / 16 {
                    return Err(DecodeError::new("Array length exceeds reasonable maximum"));
                }
                self.stack.push(PartialArray {
                    remaining: count,
                    items: Vec::with_capacity(count.min(1024)),
                });
                Ok(None)
            }
            other => Err(DecodeError::new(format!(
                "unknown frame type: {:?}",
                other as char
            ))),
        }
    }

    /// Attaches a finished frame to the innermost open array, closing every
    /// array that becomes full. Returns the frame once no array is open.
    fn complete(&mut self, mut frame: Frame) -> Option<Frame> {
        while let Some(top) = self.stack.last_mut() {
            top.items.push(frame);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            frame = Frame::Array(items);
        }
        Some(frame)
    }

    /// Searches for the next CRLF sequence, resuming where the last search
    /// stopped.
    fn find_crlf(&mut self) -> Result<Option<usize>, DecodeError> {
        let start = self.scanned;
        if let Some(pos) = self.buf[start..].windows(2).position(|w| w == b"\r\n") {
            return Ok(Some(start + pos));
        }
        self.scanned = self.buf.len().saturating_sub(1);
        if self.scanned > self.max_frame_size {
            return Err(DecodeError::new("Buffer size exceeded maximum frame size"));
        }
        Ok(None)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(digits: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::new(format!(
                "invalid integer: {:?}",
                String::from_utf8_lossy(digits)
            ))
        })
}
