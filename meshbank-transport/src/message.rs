//! Typed protocol messages.
//!
//! The message kind is a closed enum: every protocol loop matches on
//! [`MessageBody`] exhaustively, so adding a kind forces every role to decide
//! what to do with it.

use std::fmt;

use meshbank_core::{BalanceHistory, Timestamp, TransferOrder};

/// Discriminant of a message as carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Participant finished setup and entered its protocol loop.
    Started = 0,
    /// Account processed STOP and will not originate transfers any more.
    Done = 1,
    /// Destination Account applied a transfer.
    Ack = 2,
    /// Coordinator asks Accounts to wind down.
    Stop = 3,
    /// Move money between Accounts.
    Transfer = 4,
    /// Account's frozen balance trace, sent to the Coordinator at shutdown.
    BalanceHistory = 5,
}

impl MessageKind {
    /// Every kind, in wire order.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Started,
        MessageKind::Done,
        MessageKind::Ack,
        MessageKind::Stop,
        MessageKind::Transfer,
        MessageKind::BalanceHistory,
    ];

    /// Value written in the frame header.
    pub const fn as_wire(self) -> u16 {
        self as u16
    }

    /// Parse a header value.
    pub fn from_wire(raw: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_wire() == raw)
    }

    /// Upper-case protocol name.
    pub const fn name(self) -> &'static str {
        match self {
            MessageKind::Started => "STARTED",
            MessageKind::Done => "DONE",
            MessageKind::Ack => "ACK",
            MessageKind::Stop => "STOP",
            MessageKind::Transfer => "TRANSFER",
            MessageKind::BalanceHistory => "BALANCE_HISTORY",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of a message, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Human-readable status line, only used for logging.
    Started(String),
    /// Human-readable status line, only used for logging.
    Done(String),
    /// No payload.
    Ack,
    /// No payload.
    Stop,
    /// Order to debit `src` and credit `dst`.
    Transfer(TransferOrder),
    /// Complete history of one Account.
    BalanceHistory(BalanceHistory),
}

impl MessageBody {
    /// Kind carried in the header for this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Started(_) => MessageKind::Started,
            MessageBody::Done(_) => MessageKind::Done,
            MessageBody::Ack => MessageKind::Ack,
            MessageBody::Stop => MessageKind::Stop,
            MessageBody::Transfer(_) => MessageKind::Transfer,
            MessageBody::BalanceHistory(_) => MessageKind::BalanceHistory,
        }
    }
}

/// A message stamped with the sender's Lamport time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender's clock value for the send event.
    pub logical_time: Timestamp,
    /// Typed payload.
    pub body: MessageBody,
}

impl Message {
    /// Create a message sent at `logical_time`.
    pub fn new(logical_time: Timestamp, body: MessageBody) -> Self {
        Self { logical_time, body }
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// STARTED with a status line.
    pub fn started(logical_time: Timestamp, status: impl Into<String>) -> Self {
        Self::new(logical_time, MessageBody::Started(status.into()))
    }

    /// DONE with a status line.
    pub fn done(logical_time: Timestamp, status: impl Into<String>) -> Self {
        Self::new(logical_time, MessageBody::Done(status.into()))
    }

    /// ACK.
    pub fn ack(logical_time: Timestamp) -> Self {
        Self::new(logical_time, MessageBody::Ack)
    }

    /// STOP.
    pub fn stop(logical_time: Timestamp) -> Self {
        Self::new(logical_time, MessageBody::Stop)
    }

    /// TRANSFER carrying `order`.
    pub fn transfer(logical_time: Timestamp, order: TransferOrder) -> Self {
        Self::new(logical_time, MessageBody::Transfer(order))
    }

    /// BALANCE_HISTORY carrying `history`.
    pub fn balance_history(logical_time: Timestamp, history: BalanceHistory) -> Self {
        Self::new(logical_time, MessageBody::BalanceHistory(history))
    }
}
