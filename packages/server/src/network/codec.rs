//! Delimiter framing codec.
//!
//! Inbound bytes are split on [`FRAME_DELIMITER`]; the delimiter itself is
//! consumed. Outbound envelopes are encoded and followed by the same
//! delimiter so both directions use one splitter.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use waiter_core::{Envelope, EnvelopeError, FRAME_DELIMITER};

/// Errors produced by [`FrameCodec`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of at least {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("envelope encoding failed: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Splits a byte stream into delimiter-terminated frames of bounded size.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    /// Offset up to which the buffer is known not to contain a delimiter.
    next_index: usize,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }

    #[must_use]
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        let start = self.next_index.min(src.len());
        if let Some(offset) = find_delimiter(&src[start..]) {
            let frame_len = start + offset;
            self.next_index = 0;
            if frame_len > self.max_frame_len {
                return Err(FrameError::TooLarge {
                    len: frame_len,
                    max: self.max_frame_len,
                });
            }
            let frame = src.split_to(frame_len);
            src.advance(FRAME_DELIMITER.len());
            return Ok(Some(frame));
        }

        // No delimiter yet. A delimiter arriving later can start no earlier
        // than `len - (DELIM - 1)`, so past this point the frame is too long.
        if src.len() >= self.max_frame_len + FRAME_DELIMITER.len() {
            return Err(FrameError::TooLarge {
                len: src.len(),
                max: self.max_frame_len,
            });
        }
        self.next_index = src.len().saturating_sub(FRAME_DELIMITER.len() - 1);
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Trailing bytes without a delimiter are an incomplete frame.
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload = item.encode()?;
        dst.reserve(payload.len() + FRAME_DELIMITER.len());
        dst.put_slice(&payload);
        dst.put_slice(&FRAME_DELIMITER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use waiter_core::Reason;

    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut bytes = payload.to_vec();
        bytes.extend_from_slice(&FRAME_DELIMITER);
        bytes
    }

    #[test]
    fn splits_on_delimiter() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&framed(b"first"));
        buf.extend_from_slice(&framed(b"second"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_split_delimiter() {
        let mut codec = FrameCodec::new(64);
        let bytes = framed(b"payload");
        let (head, tail) = bytes.split_at(bytes.len() - 3);

        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(tail);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"payload");
    }

    #[test]
    fn raw_delimiter_alone_does_not_split() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"abc\r\n\r\ndef"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn frame_at_limit_is_accepted() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&framed(&[7u8; 8])[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 8);
    }

    #[test]
    fn complete_frame_over_limit_is_rejected() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&framed(&[7u8; 9])[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len: 9, max: 8 }));
    }

    #[test]
    fn unterminated_frame_over_limit_is_rejected_early() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&[1u8; 13][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[1u8]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn eof_drops_incomplete_frame() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"partial"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn encoder_appends_delimiter() {
        let mut codec = FrameCodec::new(64);
        let mut dst = BytesMut::new();
        let envelope = Envelope::failure(Reason::InternalServerError.error());
        codec.encode(envelope.clone(), &mut dst).unwrap();

        let mut decoder = FrameCodec::new(1024);
        let frame = decoder.decode(&mut dst).unwrap().unwrap();
        assert_eq!(Envelope::decode(&frame).unwrap(), envelope);
        assert!(dst.is_empty());
    }

    proptest! {
        #[test]
        fn chunked_arrival_yields_same_frames(
            payloads in proptest::collection::vec(
                proptest::collection::vec(0u8..0xc4, 0..32),
                1..6,
            ),
            chunk in 1usize..16,
        ) {
            let mut wire = Vec::new();
            for payload in &payloads {
                wire.extend_from_slice(&framed(payload));
            }

            let mut codec = FrameCodec::new(64);
            let mut buf = BytesMut::new();
            let mut frames = Vec::new();
            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    frames.push(frame.to_vec());
                }
            }

            prop_assert_eq!(frames, payloads);
        }
    }
}
