//! Newline-delimited JSON framing for the relay's stdio peer

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line size (16 MB)
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Line codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// One decoded unit of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete non-blank line, without its terminator
    Line(String),
    /// A line that exceeded the size limit and was discarded
    Oversized { size: usize },
}

/// Codec that yields one [`Frame`] per input line and writes one JSON value
/// per output line
#[derive(Debug)]
pub struct JsonLineCodec {
    max_length: usize,
    /// Where the next newline search should start
    next_index: usize,
    /// Bytes dropped so far from an oversized line
    discarding: Option<usize>,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_SIZE)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }

    fn finish_line(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            if let Some(dropped) = self.discarding {
                match newline {
                    Some(offset) => {
                        let end = self.next_index + offset + 1;
                        let _ = src.split_to(end);
                        self.next_index = 0;
                        self.discarding = None;
                        return Ok(Some(Frame::Oversized { size: dropped + end }));
                    }
                    None => {
                        self.discarding = Some(dropped + src.len());
                        src.clear();
                        self.next_index = 0;
                        return Ok(None);
                    }
                }
            }

            match newline {
                Some(offset) => {
                    let end = self.next_index + offset;
                    let line = src.split_to(end + 1);
                    self.next_index = 0;
                    if end > self.max_length {
                        return Ok(Some(Frame::Oversized { size: end }));
                    }
                    match Self::finish_line(&line[..end]) {
                        Some(text) => return Ok(Some(Frame::Line(text))),
                        None => continue,
                    }
                }
                None if src.len() > self.max_length => {
                    self.discarding = Some(src.len());
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if let Some(dropped) = self.discarding.take() {
            return Ok(Some(Frame::Oversized { size: dropped }));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(Self::finish_line(&rest).map(Frame::Line))
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&item)?;
        if data.len() > self.max_length {
            return Err(CodecError::MessageTooLarge {
                size: data.len(),
                max: self.max_length,
            });
        }
        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Encode a single value as one newline-terminated line
pub fn encode_line<T: Serialize>(item: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    JsonLineCodec::new().encode(item, &mut buf)?;
    Ok(buf.to_vec())
}
