//! Structured protocol events.
//!
//! Roles report what happened as [`LedgerEvent`] values; an [`EventSink`]
//! decides where they go. The `Display` impl renders the one-line text used in
//! `events.log` and in STARTED/DONE payloads.

use std::cell::RefCell;
use std::fmt;

use meshbank_core::{Balance, ParticipantId, Timestamp};
use meshbank_transport::MessageKind;

/// One significant protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// Account entered its protocol loop.
    Started {
        /// Logical time of the STARTED multicast.
        time: Timestamp,
        /// Account id.
        id: ParticipantId,
        /// OS process id.
        pid: u32,
        /// OS parent process id.
        parent_pid: u32,
        /// Initial balance.
        balance: Balance,
    },
    /// Participant counted every STARTED it waits for.
    ReceivedAllStarted {
        /// Logical time of the last STARTED.
        time: Timestamp,
        /// Participant id.
        id: ParticipantId,
    },
    /// Account debited itself and forwarded a transfer.
    TransferOut {
        /// Logical time of the forward.
        time: Timestamp,
        /// Source Account.
        id: ParticipantId,
        /// Amount moved.
        amount: Balance,
        /// Destination Account.
        dst: ParticipantId,
    },
    /// Account applied an incoming transfer.
    TransferIn {
        /// Logical time of the receive.
        time: Timestamp,
        /// Destination Account.
        id: ParticipantId,
        /// Amount moved.
        amount: Balance,
        /// Source Account.
        src: ParticipantId,
    },
    /// Account processed STOP.
    Done {
        /// Logical time of the DONE multicast.
        time: Timestamp,
        /// Account id.
        id: ParticipantId,
        /// Final balance.
        balance: Balance,
    },
    /// Participant counted every DONE (or history) it waits for.
    ReceivedAllDone {
        /// Logical time of the last DONE.
        time: Timestamp,
        /// Participant id.
        id: ParticipantId,
    },
    /// Coordinator got something other than ACK for a transfer.
    TransferRejected {
        /// Logical time of the reply.
        time: Timestamp,
        /// Coordinator id.
        id: ParticipantId,
        /// Source Account of the order.
        src: ParticipantId,
        /// Destination Account of the order.
        dst: ParticipantId,
        /// Kind actually received.
        reply: MessageKind,
    },
}

impl LedgerEvent {
    /// Logical time of the event.
    pub fn time(&self) -> Timestamp {
        match self {
            LedgerEvent::Started { time, .. }
            | LedgerEvent::ReceivedAllStarted { time, .. }
            | LedgerEvent::TransferOut { time, .. }
            | LedgerEvent::TransferIn { time, .. }
            | LedgerEvent::Done { time, .. }
            | LedgerEvent::ReceivedAllDone { time, .. }
            | LedgerEvent::TransferRejected { time, .. } => *time,
        }
    }

    /// Participant reporting the event.
    pub fn participant(&self) -> ParticipantId {
        match self {
            LedgerEvent::Started { id, .. }
            | LedgerEvent::ReceivedAllStarted { id, .. }
            | LedgerEvent::TransferOut { id, .. }
            | LedgerEvent::TransferIn { id, .. }
            | LedgerEvent::Done { id, .. }
            | LedgerEvent::ReceivedAllDone { id, .. }
            | LedgerEvent::TransferRejected { id, .. } => *id,
        }
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEvent::Started {
                time,
                id,
                pid,
                parent_pid,
                balance,
            } => write!(
                f,
                "{time}: process {id} (pid {pid:5}, parent {parent_pid:5}) has STARTED with balance ${balance:2}"
            ),
            LedgerEvent::ReceivedAllStarted { time, id } => {
                write!(f, "{time}: process {id} received all STARTED messages")
            }
            LedgerEvent::TransferOut {
                time,
                id,
                amount,
                dst,
            } => write!(f, "{time}: process {id} transferred ${amount:2} to process {dst}"),
            LedgerEvent::TransferIn {
                time,
                id,
                amount,
                src,
            } => write!(f, "{time}: process {id} received ${amount:2} from process {src}"),
            LedgerEvent::Done { time, id, balance } => {
                write!(f, "{time}: process {id} has DONE with balance ${balance:2}")
            }
            LedgerEvent::ReceivedAllDone { time, id } => {
                write!(f, "{time}: process {id} received all DONE messages")
            }
            LedgerEvent::TransferRejected {
                time,
                id,
                src,
                dst,
                reply,
            } => write!(
                f,
                "{time}: process {id} expected ACK for transfer {src} -> {dst}, got {reply}"
            ),
        }
    }
}

/// Destination for [`LedgerEvent`]s.
///
/// Sinks take `&self`: every role of a local run shares one sink.
pub trait EventSink {
    /// Record one event.
    fn record(&self, event: &LedgerEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::TransferRejected { .. } => tracing::warn!(
                participant = %event.participant(),
                time = event.time(),
                "{event}"
            ),
            _ => tracing::info!(
                participant = %event.participant(),
                time = event.time(),
                "{event}"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<LedgerEvent>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far, in recording order.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.borrow().clone()
    }

    /// Rendered lines, in recording order.
    pub fn lines(&self) -> Vec<String> {
        self.events.borrow().iter().map(ToString::to_string).collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &LedgerEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
