//! Length-prefixed JSON framing.
//!
//! A frame is a 4-byte big-endian body length followed by the body. The
//! decoder accepts bytes in arbitrary chunks and yields whole frames only.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

const LEN_PREFIX: usize = 4;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte stream does not contain a valid frame. Fatal to the channel.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A message could not be serialised.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialise `message` into a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| CodecError::MalformedFrame(format!("body of {} bytes", body.len())))?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects bodies longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Append raw bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Pop the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buffer.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LEN_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_len {
            return Err(CodecError::MalformedFrame(format!(
                "frame length {len} exceeds limit {}",
                self.max_frame_len
            )));
        }

        if self.buffer.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        let body = self.buffer[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.buffer.drain(..LEN_PREFIX + len);
        Ok(Some(body))
    }

    /// Pop and deserialise the next complete frame.
    pub fn next_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        match self.next_frame()? {
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|err| CodecError::MalformedFrame(err.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseEnvelope;
    use serde_json::json;

    #[test]
    fn decodes_byte_at_a_time() {
        let frame = encode_frame(&ResponseEnvelope::success(4, json!({"a": 1}))).unwrap();
        let mut decoder = FrameDecoder::new(1024);
        for (i, byte) in frame.iter().enumerate() {
            let decoded: Option<ResponseEnvelope> = decoder.next_message().unwrap();
            assert!(decoded.is_none(), "frame emitted early at byte {i}");
            decoder.push(&[*byte]);
        }
        let decoded: ResponseEnvelope = decoder.next_message().unwrap().unwrap();
        assert_eq!(decoded.id, 4);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn yields_one_message_per_frame() {
        let mut bytes = encode_frame(&ResponseEnvelope::success(1, json!(null))).unwrap();
        bytes.extend(encode_frame(&ResponseEnvelope::success(2, json!(null))).unwrap());
        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&bytes);

        let first: ResponseEnvelope = decoder.next_message().unwrap().unwrap();
        let second: ResponseEnvelope = decoder.next_message().unwrap().unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_malformed() {
        let mut decoder = FrameDecoder::new(8);
        decoder.push(&100u32.to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn invalid_json_body_is_malformed() {
        let mut decoder = FrameDecoder::new(64);
        decoder.push(&3u32.to_be_bytes());
        decoder.push(b"{{{");
        let result: Result<Option<ResponseEnvelope>, _> = decoder.next_message();
        assert!(matches!(result, Err(CodecError::MalformedFrame(_))));
    }
}
