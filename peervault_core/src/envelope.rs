//! The on-wire message envelope: a closed tagged union of four variants,
//! encoded by hand with `bytes::{Buf, BufMut}` rather than a
//! general-purpose reflective codec — a tag byte, fixed-width fields, and
//! explicit bounds checks that return a typed error instead of panicking
//! on truncated input.

use crate::error::PeerVaultError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use peervault_crypto::{HASHED_KEY_LEN, HashedKey, NodeId, RequestId};

const TAG_STORE_FILE: u8 = 0x00;
const TAG_GET_FILE: u8 = 0x01;
const TAG_STORE_FILE_ACK: u8 = 0x02;
const TAG_GET_FILE_ACK: u8 = 0x03;

const NODE_ID_LEN: usize = 32;
const REQUEST_ID_LEN: usize = 32;

/// The tagged union transmitted between peers.
///
/// `StoreFile` and `GetFile` both carry a `request_id` so the receiver's
/// ack (`{RequestID, Success}`) can correlate back to a specific
/// announcement. Recorded as a decision in DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    StoreFile {
        sender_id: NodeId,
        request_id: RequestId,
        hashed_key: HashedKey,
        size: u64,
    },
    GetFile {
        sender_id: NodeId,
        request_id: RequestId,
        hashed_key: HashedKey,
    },
    StoreFileAck {
        request_id: RequestId,
        hashed_key: HashedKey,
        success: bool,
        error: Option<String>,
    },
    GetFileAck {
        request_id: RequestId,
        hashed_key: HashedKey,
        has_file: bool,
        /// Present iff `has_file`; the on-disk ciphertext length the
        /// requester should expect on the follow-up stream frame.
        size: Option<u64>,
    },
}

impl Envelope {
    pub fn request_id(&self) -> RequestId {
        match self {
            Envelope::StoreFile { request_id, .. }
            | Envelope::GetFile { request_id, .. }
            | Envelope::StoreFileAck { request_id, .. }
            | Envelope::GetFileAck { request_id, .. } => *request_id,
        }
    }

    pub fn hashed_key(&self) -> &HashedKey {
        match self {
            Envelope::StoreFile { hashed_key, .. }
            | Envelope::GetFile { hashed_key, .. }
            | Envelope::StoreFileAck { hashed_key, .. }
            | Envelope::GetFileAck { hashed_key, .. } => hashed_key,
        }
    }

    /// Serializes this envelope to its wire form.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Envelope::StoreFile {
                sender_id,
                request_id,
                hashed_key,
                size,
            } => {
                // Size fields in the envelope are little-endian, unlike the
                // fixed-width id/hash fields above, which are opaque byte
                // strings with no endianness.
                buf.put_u8(TAG_STORE_FILE);
                buf.put_slice(sender_id.as_bytes());
                buf.put_slice(request_id.as_bytes());
                buf.put_slice(hashed_key.as_bytes());
                buf.put_u64_le(*size);
            }
            Envelope::GetFile {
                sender_id,
                request_id,
                hashed_key,
            } => {
                buf.put_u8(TAG_GET_FILE);
                buf.put_slice(sender_id.as_bytes());
                buf.put_slice(request_id.as_bytes());
                buf.put_slice(hashed_key.as_bytes());
            }
            Envelope::StoreFileAck {
                request_id,
                hashed_key,
                success,
                error,
            } => {
                buf.put_u8(TAG_STORE_FILE_ACK);
                buf.put_slice(request_id.as_bytes());
                buf.put_slice(hashed_key.as_bytes());
                buf.put_u8(*success as u8);
                put_optional_string(&mut buf, error.as_deref());
            }
            Envelope::GetFileAck {
                request_id,
                hashed_key,
                has_file,
                size,
            } => {
                buf.put_u8(TAG_GET_FILE_ACK);
                buf.put_slice(request_id.as_bytes());
                buf.put_slice(hashed_key.as_bytes());
                buf.put_u8(*has_file as u8);
                buf.put_u8(size.is_some() as u8);
                buf.put_u64_le(size.unwrap_or(0));
            }
        }
        buf.freeze()
    }

    /// Parses an envelope from its wire form. Rejects unknown tags with a
    /// typed error and never panics on truncated input.
    pub fn decode(mut bytes: Bytes) -> Result<Self, PeerVaultError> {
        require(&bytes, 1)?;
        let tag = bytes.get_u8();
        match tag {
            TAG_STORE_FILE => {
                require(&bytes, NODE_ID_LEN + REQUEST_ID_LEN + HASHED_KEY_LEN + 8)?;
                let sender_id = get_node_id(&mut bytes);
                let request_id = get_request_id(&mut bytes);
                let hashed_key = get_hashed_key(&mut bytes);
                let size = bytes.get_u64_le();
                Ok(Envelope::StoreFile {
                    sender_id,
                    request_id,
                    hashed_key,
                    size,
                })
            }
            TAG_GET_FILE => {
                require(&bytes, NODE_ID_LEN + REQUEST_ID_LEN + HASHED_KEY_LEN)?;
                let sender_id = get_node_id(&mut bytes);
                let request_id = get_request_id(&mut bytes);
                let hashed_key = get_hashed_key(&mut bytes);
                Ok(Envelope::GetFile {
                    sender_id,
                    request_id,
                    hashed_key,
                })
            }
            TAG_STORE_FILE_ACK => {
                require(&bytes, REQUEST_ID_LEN + HASHED_KEY_LEN + 1)?;
                let request_id = get_request_id(&mut bytes);
                let hashed_key = get_hashed_key(&mut bytes);
                let success = bytes.get_u8() != 0;
                let error = get_optional_string(&mut bytes)?;
                Ok(Envelope::StoreFileAck {
                    request_id,
                    hashed_key,
                    success,
                    error,
                })
            }
            TAG_GET_FILE_ACK => {
                require(&bytes, REQUEST_ID_LEN + HASHED_KEY_LEN + 1 + 1 + 8)?;
                let request_id = get_request_id(&mut bytes);
                let hashed_key = get_hashed_key(&mut bytes);
                let has_file = bytes.get_u8() != 0;
                let size_present = bytes.get_u8() != 0;
                let raw_size = bytes.get_u64_le();
                let size = size_present.then_some(raw_size);
                Ok(Envelope::GetFileAck {
                    request_id,
                    hashed_key,
                    has_file,
                    size,
                })
            }
            other => Err(PeerVaultError::ProtocolError(format!(
                "unknown envelope tag: {other:#04x}"
            ))),
        }
    }
}

fn require(bytes: &Bytes, n: usize) -> Result<(), PeerVaultError> {
    if bytes.remaining() < n {
        return Err(PeerVaultError::ProtocolError(format!(
            "truncated envelope: need {n} more bytes, have {}",
            bytes.remaining()
        )));
    }
    Ok(())
}

fn get_node_id(bytes: &mut Bytes) -> NodeId {
    let mut raw = [0u8; NODE_ID_LEN];
    bytes.copy_to_slice(&mut raw);
    NodeId::from_bytes(raw)
}

fn get_request_id(bytes: &mut Bytes) -> RequestId {
    let mut raw = [0u8; REQUEST_ID_LEN];
    bytes.copy_to_slice(&mut raw);
    RequestId::from_bytes(raw)
}

fn get_hashed_key(bytes: &mut Bytes) -> HashedKey {
    let mut raw = [0u8; HASHED_KEY_LEN];
    bytes.copy_to_slice(&mut raw);
    HashedKey::from_bytes(raw)
}

fn put_optional_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        None => buf.put_u8(0),
        Some(s) => {
            buf.put_u8(1);
            buf.put_u16(s.len() as u16);
            buf.put_slice(s.as_bytes());
        }
    }
}

fn get_optional_string(bytes: &mut Bytes) -> Result<Option<String>, PeerVaultError> {
    require(bytes, 1)?;
    if bytes.get_u8() == 0 {
        return Ok(None);
    }
    require(bytes, 2)?;
    let len = bytes.get_u16() as usize;
    require(bytes, len)?;
    let raw = bytes.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map(Some)
        .map_err(|e| PeerVaultError::ProtocolError(format!("invalid utf8 in envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store_file() -> Envelope {
        Envelope::StoreFile {
            sender_id: NodeId::from_bytes([1u8; 32]),
            request_id: RequestId::from_bytes([2u8; 32]),
            hashed_key: HashedKey::compute("k"),
            size: 1234,
        }
    }

    #[test]
    fn store_file_round_trips() {
        let env = sample_store_file();
        let encoded = env.encode();
        let decoded = Envelope::decode(encoded).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn get_file_round_trips() {
        let env = Envelope::GetFile {
            sender_id: NodeId::from_bytes([3u8; 32]),
            request_id: RequestId::from_bytes([4u8; 32]),
            hashed_key: HashedKey::compute("another-key"),
        };
        let decoded = Envelope::decode(env.encode()).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn store_file_ack_round_trips_with_error() {
        let env = Envelope::StoreFileAck {
            request_id: RequestId::from_bytes([5u8; 32]),
            hashed_key: HashedKey::compute("k"),
            success: false,
            error: Some("disk full".to_string()),
        };
        let decoded = Envelope::decode(env.encode()).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn get_file_ack_round_trips_without_file() {
        let env = Envelope::GetFileAck {
            request_id: RequestId::from_bytes([6u8; 32]),
            hashed_key: HashedKey::compute("missing"),
            has_file: false,
            size: None,
        };
        let decoded = Envelope::decode(env.encode()).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn unknown_tag_is_rejected_with_typed_error() {
        let mut raw = vec![0xFFu8];
        raw.extend(std::iter::repeat(0).take(64));
        let err = Envelope::decode(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, PeerVaultError::ProtocolError(_)));
    }

    #[test]
    fn truncated_input_is_rejected_not_panicking() {
        let encoded = sample_store_file().encode();
        let truncated = encoded.slice(0..encoded.len() - 4);
        let err = Envelope::decode(truncated).unwrap_err();
        assert!(matches!(err, PeerVaultError::ProtocolError(_)));
    }

    #[test]
    fn empty_input_is_rejected_not_panicking() {
        let err = Envelope::decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, PeerVaultError::ProtocolError(_)));
    }
}
