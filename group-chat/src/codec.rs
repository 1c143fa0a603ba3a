//! Newline framing for the chat wire protocol.
//!
//! Every protocol message is a single line terminated by `\n`. The decoder
//! buffers bytes until a terminator shows up and refuses to buffer more than
//! [`MAX_LINE_LEN`] bytes for a single line, so a peer that never sends a
//! newline cannot grow the buffer without bound.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Longest accepted line, terminator included.
pub const MAX_LINE_LEN: usize = 256;

/// Longest line a client accepts from the server. A `who` roster grows with
/// the number of connected clients, so it is not held to [`MAX_LINE_LEN`].
pub const MAX_REPLY_LEN: usize = 64 * 1024;

const LINE_FEED: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// `tokio_util` codec turning a byte stream into protocol lines and back.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Offset already scanned for a terminator, so a slow peer's partial line
    /// is not rescanned on every read.
    next_index: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LEN)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let scan_end = src.len().min(self.max_length);
        let start = self.next_index.min(scan_end);
        let terminator = src[start..scan_end]
            .iter()
            .position(|byte| *byte == LINE_FEED);

        match terminator {
            Some(offset) => {
                let end = start + offset;
                self.next_index = 0;
                let frame = src.split_to(end + 1);
                Ok(Some(line_from_bytes(&frame[..end])))
            }
            None if src.len() >= self.max_length => Err(CodecError::FrameTooLong {
                max: self.max_length,
            }),
            None => {
                self.next_index = scan_end;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // An unterminated tail is not a command; the stream is simply over.
        src.clear();
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(LINE_FEED);
        Ok(())
    }
}

fn line_from_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(&[CARRIAGE_RETURN]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
