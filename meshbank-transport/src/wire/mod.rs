//! Wire format for message framing.
//!
//! Frame format: `[magic:4][kind:2][payload_len:2][logical_time:8][payload:N]`
//!
//! - **magic**: [`MESSAGE_MAGIC`], checked on every receive (little-endian u32)
//! - **kind**: [`MessageKind`] discriminant (little-endian u16)
//! - **payload_len**: number of payload bytes that follow (little-endian u16)
//! - **logical_time**: sender's Lamport timestamp (little-endian u64)
//! - **payload**: kind-specific encoding, see [`encode_body`]
//!
//! A magic mismatch means the byte stream is desynchronized. There is no
//! resynchronization: the receiver must treat it as fatal.

use meshbank_core::{
    BalanceHistory, BalanceState, HistoryError, MAX_HISTORY_LEN, ParticipantId, TransferOrder,
};

use crate::message::{Message, MessageBody, MessageKind};

/// Constant opening every frame.
pub const MESSAGE_MAGIC: u32 = 0xAFAF;

/// Header size: 4 (magic) + 2 (kind) + 2 (payload_len) + 8 (logical_time) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (16 KiB).
///
/// Large enough for a [`BalanceHistory`] of [`MAX_HISTORY_LEN`] entries.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Encoded size of a [`TransferOrder`]: src (1) + dst (1) + amount (8).
pub const TRANSFER_PAYLOAD_SIZE: usize = 10;

/// Encoded size of one [`BalanceState`]: time (8) + balance (8) + pending_in (8).
pub const BALANCE_STATE_SIZE: usize = 24;

/// History prefix: owner (1) + entry count (2).
const HISTORY_PREFIX_SIZE: usize = 3;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Frame does not start with [`MESSAGE_MAGIC`]; the stream is desynchronized.
    #[error("bad magic: expected {MESSAGE_MAGIC:#06x}, got {found:#010x}")]
    BadMagic {
        /// Value found where the magic should be.
        found: u32,
    },

    /// Header names a kind this build does not know.
    #[error("unknown message kind: {kind}")]
    UnknownKind {
        /// Raw kind value.
        kind: u16,
    },

    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
    },

    /// Payload length does not match the kind's encoding.
    #[error("{kind} payload must be {expected} bytes, got {actual}")]
    PayloadLength {
        /// Kind being decoded.
        kind: MessageKind,
        /// Length implied by the encoding.
        expected: usize,
        /// Length found.
        actual: usize,
    },

    /// Participant id outside the supported range.
    #[error("invalid participant id: {raw}")]
    InvalidParticipant {
        /// Raw id.
        raw: i8,
    },

    /// History payload violates the history invariants.
    #[error("invalid balance history: {0}")]
    History(#[from] HistoryError),
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Should equal [`MESSAGE_MAGIC`].
    pub magic: u32,
    /// Raw kind discriminant.
    pub kind: u16,
    /// Bytes of payload following the header.
    pub payload_len: u16,
    /// Sender's Lamport timestamp.
    pub logical_time: u64,
}

impl FrameHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than HEADER_SIZE.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.kind.to_le_bytes());
        buf[6..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.logical_time.to_le_bytes());
    }

    /// Deserialize header from buffer without validating it.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            kind: u16::from_le_bytes([buf[4], buf[5]]),
            payload_len: u16::from_le_bytes([buf[6], buf[7]]),
            logical_time: u64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        })
    }

    /// Check magic, kind and payload bound, returning the parsed kind.
    ///
    /// # Errors
    ///
    /// - `BadMagic`: stream is desynchronized
    /// - `UnknownKind`: kind outside [`MessageKind`]
    /// - `PayloadTooLarge`: announced payload exceeds [`MAX_PAYLOAD_SIZE`]
    pub fn validate(&self) -> Result<MessageKind, WireError> {
        if self.magic != MESSAGE_MAGIC {
            return Err(WireError::BadMagic { found: self.magic });
        }
        let kind = MessageKind::from_wire(self.kind)
            .ok_or(WireError::UnknownKind { kind: self.kind })?;
        if self.payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge {
                size: self.payload_len as usize,
            });
        }
        Ok(kind)
    }
}

/// Encode the payload of a message body.
///
/// - STARTED / DONE: UTF-8 status line
/// - ACK / STOP: empty
/// - TRANSFER: `[src:1][dst:1][amount:8]`
/// - BALANCE_HISTORY: `[owner:1][len:2]` then `len` x `[time:8][balance:8][pending_in:8]`
pub fn encode_body(body: &MessageBody) -> Vec<u8> {
    match body {
        MessageBody::Started(status) | MessageBody::Done(status) => status.as_bytes().to_vec(),
        MessageBody::Ack | MessageBody::Stop => Vec::new(),
        MessageBody::Transfer(order) => {
            let mut buf = Vec::with_capacity(TRANSFER_PAYLOAD_SIZE);
            buf.push(order.src.raw() as u8);
            buf.push(order.dst.raw() as u8);
            buf.extend_from_slice(&order.amount.to_le_bytes());
            buf
        }
        MessageBody::BalanceHistory(history) => {
            let entries = history.entries();
            let mut buf =
                Vec::with_capacity(HISTORY_PREFIX_SIZE + entries.len() * BALANCE_STATE_SIZE);
            buf.push(history.owner().raw() as u8);
            buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for state in entries {
                buf.extend_from_slice(&state.time.to_le_bytes());
                buf.extend_from_slice(&state.balance.to_le_bytes());
                buf.extend_from_slice(&state.pending_in.to_le_bytes());
            }
            buf
        }
    }
}

/// Decode a payload according to `kind`.
///
/// # Errors
///
/// - `PayloadLength`: size does not match the kind's encoding
/// - `InvalidParticipant`: an embedded id is out of range
/// - `History`: a history payload is not contiguous or too long
pub fn decode_body(kind: MessageKind, payload: &[u8]) -> Result<MessageBody, WireError> {
    match kind {
        MessageKind::Started => Ok(MessageBody::Started(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        MessageKind::Done => Ok(MessageBody::Done(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        MessageKind::Ack => {
            expect_len(kind, payload, 0)?;
            Ok(MessageBody::Ack)
        }
        MessageKind::Stop => {
            expect_len(kind, payload, 0)?;
            Ok(MessageBody::Stop)
        }
        MessageKind::Transfer => {
            expect_len(kind, payload, TRANSFER_PAYLOAD_SIZE)?;
            let src = participant(payload[0])?;
            let dst = participant(payload[1])?;
            let amount = i64::from_le_bytes(read_array(&payload[2..10]));
            Ok(MessageBody::Transfer(TransferOrder::new(src, dst, amount)))
        }
        MessageKind::BalanceHistory => decode_history(payload).map(MessageBody::BalanceHistory),
    }
}

fn decode_history(payload: &[u8]) -> Result<BalanceHistory, WireError> {
    if payload.len() < HISTORY_PREFIX_SIZE {
        return Err(WireError::PayloadLength {
            kind: MessageKind::BalanceHistory,
            expected: HISTORY_PREFIX_SIZE,
            actual: payload.len(),
        });
    }
    let owner = participant(payload[0])?;
    let len = u16::from_le_bytes([payload[1], payload[2]]) as usize;
    if len > MAX_HISTORY_LEN {
        return Err(HistoryError::TooLong { len }.into());
    }
    expect_len(
        MessageKind::BalanceHistory,
        payload,
        HISTORY_PREFIX_SIZE + len * BALANCE_STATE_SIZE,
    )?;

    let entries = payload[HISTORY_PREFIX_SIZE..]
        .chunks_exact(BALANCE_STATE_SIZE)
        .map(|chunk| BalanceState {
            time: u64::from_le_bytes(read_array(&chunk[0..8])),
            balance: i64::from_le_bytes(read_array(&chunk[8..16])),
            pending_in: i64::from_le_bytes(read_array(&chunk[16..24])),
        })
        .collect();

    Ok(BalanceHistory::from_entries(owner, entries)?)
}

fn expect_len(kind: MessageKind, payload: &[u8], expected: usize) -> Result<(), WireError> {
    if payload.len() != expected {
        return Err(WireError::PayloadLength {
            kind,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn participant(byte: u8) -> Result<ParticipantId, WireError> {
    let raw = byte as i8;
    ParticipantId::from_raw(raw).ok_or(WireError::InvalidParticipant { raw })
}

/// Copy an exactly-sized slice into an array. Callers check lengths first.
fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Serialize a message into one contiguous frame.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the encoded payload exceeds MAX_PAYLOAD_SIZE.
///
/// # Examples
///
/// ```
/// use meshbank_transport::{Message, deserialize_message, serialize_message};
///
/// let msg = Message::ack(7);
/// let frame = serialize_message(&msg).expect("serialize");
/// assert_eq!(deserialize_message(&frame).expect("deserialize"), msg);
/// ```
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    let payload = encode_body(&msg.body);
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
        });
    }

    let header = FrameHeader {
        magic: MESSAGE_MAGIC,
        kind: msg.kind().as_wire(),
        payload_len: payload.len() as u16,
        logical_time: msg.logical_time,
    };

    let mut frame = vec![0u8; HEADER_SIZE + payload.len()];
    header.serialize_into(&mut frame[..HEADER_SIZE]);
    frame[HEADER_SIZE..].copy_from_slice(&payload);
    Ok(frame)
}

/// Deserialize one complete frame.
///
/// # Errors
///
/// - `InsufficientData`: frame shorter than header + announced payload
/// - `BadMagic`, `UnknownKind`, `PayloadTooLarge`: invalid header
/// - any payload decoding error from [`decode_body`]
pub fn deserialize_message(frame: &[u8]) -> Result<Message, WireError> {
    let header = FrameHeader::deserialize(frame)?;
    let kind = header.validate()?;

    let expected_len = HEADER_SIZE + header.payload_len as usize;
    if frame.len() < expected_len {
        return Err(WireError::InsufficientData {
            needed: expected_len,
            have: frame.len(),
        });
    }

    let body = decode_body(kind, &frame[HEADER_SIZE..expected_len])?;
    Ok(Message::new(header.logical_time, body))
}
