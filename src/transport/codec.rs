//! NDJSON line codec for worker streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized line from a misbehaving worker cannot exhaust
//! memory.
//!
//! Oversized and non-UTF-8 lines are reported as [`Frame::Oversized`] and
//! [`Frame::InvalidUtf8`] rather than as decoder errors:
//! [`FramedRead`](tokio_util::codec::FramedRead) pauses the stream after an
//! error, which a reader would mistake for end-of-stream.

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded unit of the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its trailing newline.
    Line(String),
    /// A line exceeded the limit; its bytes are being discarded up to the
    /// next newline.
    Oversized,
    /// A complete line that was not valid UTF-8; already discarded.
    InvalidUtf8,
}

/// Newline-delimited UTF-8 framing with a line length limit.
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = AppError;

    /// Decode the next line from `src`.
    ///
    /// Returns `Ok(None)` while no complete line is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode_eof(src))
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated line. The limit applies only to decoding.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Protocol("line too long: exceeded maximum line length".into())
            }
        })
    }
}

fn map_decoded(
    result: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>> {
    match result {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
        // `LinesCodec` consumes the line before checking its encoding.
        Err(LinesCodecError::Io(io_err)) if io_err.kind() == ErrorKind::InvalidData => {
            Ok(Some(Frame::InvalidUtf8))
        }
        Err(LinesCodecError::Io(io_err)) => Err(AppError::Io(io_err.to_string())),
    }
}
