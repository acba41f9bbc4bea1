use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::header::{self, Version};
use crate::parser::{ParseOutcome, parse_frame_slice};

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single NUL no-op received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (NUL byte outside any frame)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// The codec keeps no buffer of its own: it parses directly from the
/// caller's `BytesMut` and consumes bytes only when a complete item was
/// decoded. Header escaping depends on the negotiated protocol version; the
/// session starts the codec at 1.0 (no escaping, which also matches the
/// CONNECT/CONNECTED exchange) and switches it after version negotiation.
#[derive(Debug, Clone)]
pub struct StompCodec {
    version: Version,
}

impl StompCodec {
    pub fn new() -> Self {
        Self {
            version: Version::V1_0,
        }
    }

    pub fn with_version(version: Version) -> Self {
        Self { version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns `Ok(Some(_))` when a full item (frame or heartbeat) was
    /// decoded and its bytes consumed from `src`, `Ok(None)` when more
    /// bytes are required (nothing consumed), and `Err` on protocol
    /// violations.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match parse_frame_slice(&src[..], self.version) {
            Ok(ParseOutcome::NeedMoreData) => Ok(None),
            Ok(ParseOutcome::Heartbeat { consumed }) => {
                src.advance(consumed);
                Ok(Some(StompItem::Heartbeat))
            }
            Ok(ParseOutcome::Frame { frame, consumed }) => {
                src.advance(consumed);
                Ok(Some(StompItem::Frame(frame)))
            }
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Encode a `StompItem` into the destination buffer.
    ///
    /// Frames render as command line, headers (with `content-length` forced
    /// to the exact body length whenever a body is present), a blank line,
    /// the body bytes and a single NUL terminator. A heartbeat renders as
    /// one NUL byte.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => {
                dst.put_u8(0);
            }
            StompItem::Frame(frame) => {
                dst.extend_from_slice(frame.command.as_str().as_bytes());
                dst.put_u8(b'\n');

                let mut headers = frame.headers;
                if !frame.body.is_empty() {
                    let len = frame.body.len().to_string();
                    match headers
                        .iter_mut()
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    {
                        Some(slot) => slot.1 = len,
                        None => headers.push(("content-length".to_string(), len)),
                    }
                }

                dst.extend_from_slice(&header::serialize_headers(&headers, self.version));
                dst.put_u8(b'\n');
                dst.extend_from_slice(&frame.body);
                dst.put_u8(0);
            }
        }

        Ok(())
    }
}
