//! Error types for the fabric and transport layers.

use std::io;

use meshbank_core::{MAX_PARTICIPANTS, ParticipantId};

use crate::wire::WireError;

/// Errors raised while building the channel fabric.
///
/// Any of these aborts startup before a participant runs.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// A run needs the Coordinator and at least one Account.
    #[error("need at least 2 participants, got {count}")]
    TooFewParticipants {
        /// Requested participant count.
        count: usize,
    },

    /// Requested more participants than the compile-time bound.
    #[error("too many participants: {count} (max {MAX_PARTICIPANTS})")]
    TooManyParticipants {
        /// Requested participant count.
        count: usize,
    },

    /// `pipe(2)` or `fcntl(2)` failed.
    #[error("failed to allocate channel between {a} and {b}: {source}")]
    Allocation {
        /// Lower endpoint of the channel being created.
        a: ParticipantId,
        /// Higher endpoint of the channel being created.
        b: ParticipantId,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Asked for the table of a participant the fabric does not have.
    #[error("no channel table for participant {0}")]
    UnknownParticipant(ParticipantId),
}

/// Errors raised by [`Transport`](crate::Transport) operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Send or receive addressed to the local participant.
    #[error("participant {0} cannot message itself")]
    SelfAddressed(ParticipantId),

    /// Destination or source is not part of this run.
    #[error("participant {0} is not a peer")]
    UnknownPeer(ParticipantId),

    /// Underlying pipe failed.
    #[error("i/o error on channel with {peer}: {source}")]
    Io {
        /// Peer at the other end of the failing channel.
        peer: ParticipantId,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Frame could not be encoded or decoded. Decoding failures mean the
    /// stream is desynchronized and must not be read further.
    #[error("protocol violation on channel with {peer}: {source}")]
    Wire {
        /// Peer whose channel carried the bad frame.
        peer: ParticipantId,
        /// Framing error.
        #[source]
        source: WireError,
    },

    /// Peer closed its end of the channel.
    #[error("channel with {0} is closed")]
    PeerClosed(ParticipantId),

    /// Every peer closed its end; nothing can ever arrive again.
    #[error("all peers closed their channels")]
    AllPeersClosed,
}

impl TransportError {
    /// Whether the error indicates a corrupted or desynchronized stream.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, TransportError::Wire { .. })
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
