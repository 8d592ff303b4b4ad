//! Length-prefixed framing for envelopes on a byte stream

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::MessageEnvelope;
use crate::error::NetworkError;

/// Maximum frame payload (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Frames envelopes as `[length: u32 BE][bincode envelope]`.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    pending: Option<usize>,
}

impl EnvelopeCodec {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = MessageEnvelope;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.pending {
            Some(length) => length,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                if length > MAX_FRAME_SIZE {
                    return Err(NetworkError::Codec(format!(
                        "frame length {} exceeds max {}",
                        length, MAX_FRAME_SIZE
                    )));
                }
                src.advance(LENGTH_PREFIX_SIZE);
                self.pending = Some(length);
                length
            }
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let payload = src.split_to(length);
        self.pending = None;
        bincode::deserialize(&payload)
            .map(Some)
            .map_err(|e| NetworkError::Codec(format!("deserialize error: {}", e)))
    }
}

impl Encoder<MessageEnvelope> for EnvelopeCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: MessageEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&item)
            .map_err(|e| NetworkError::Codec(format!("serialize error: {}", e)))?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(NetworkError::Codec(format!(
                "envelope too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_SIZE
            )));
        }

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::AppProtocolVersion;
    use crate::message::Message;
    use crate::peer::Peer;
    use fugue_crypto::{address_of, random_private_key};
    use uuid::Uuid;

    fn envelope(message: Message) -> MessageEnvelope {
        let key = random_private_key();
        let apv = AppProtocolVersion::sign(&key, 1, vec![]).unwrap();
        let sender = Peer::new(address_of(&key), "127.0.0.1:6000".parse().unwrap());
        MessageEnvelope::sign(&key, Uuid::new_v4(), message, apv, sender).unwrap()
    }

    #[test]
    fn test_codec_streaming() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        let first = envelope(Message::Ping);
        let second = envelope(Message::GetChainStatus);

        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_decode() {
        let mut codec = EnvelopeCodec::new();
        let env = envelope(Message::Pong);
        let mut full = BytesMut::new();
        codec.encode(env.clone(), &mut full).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[2..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(env));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(codec.decode(&mut buf), Err(NetworkError::Codec(_))));
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(&[0xff, 0xff, 0xff]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
