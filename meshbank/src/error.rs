//! Error types for the ledger, the protocol roles and the bootstrap.

use std::io;

use meshbank_core::{Balance, HistoryError, MAX_HISTORY_LEN, ParticipantId, Timestamp, TransferOrder};
use meshbank_transport::{FabricError, MessageKind, TransportError};

/// Process exit statuses.
pub mod exit {
    /// Clean run.
    pub const SUCCESS: u8 = 0;
    /// Invalid command line.
    pub const USAGE: u8 = 1;
    /// Channel allocation, fork, runtime or log file failure.
    pub const SETUP: u8 = 2;
    /// A channel broke.
    pub const TRANSPORT: u8 = 3;
    /// Bad frame or unexpected message.
    pub const PROTOCOL: u8 = 4;
    /// Balance history capacity exceeded or a balance overflowed.
    pub const LEDGER: u8 = 5;
}

/// Errors raised by [`HistoryLedger`](crate::HistoryLedger).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Recording `time` would exceed [`MAX_HISTORY_LEN`].
    #[error("history full: cannot record time {time} (max {MAX_HISTORY_LEN} entries)")]
    HistoryFull {
        /// Timestamp that did not fit.
        time: Timestamp,
    },

    /// Asked to record a time before the last recorded one.
    #[error("time went backwards: last recorded {last}, requested {requested}")]
    TimeRegression {
        /// Last recorded timestamp.
        last: Timestamp,
        /// Requested timestamp.
        requested: Timestamp,
    },

    /// Applying a transfer would leave the balance or its pending sum outside
    /// the [`Balance`] range.
    #[error("balance overflow: {balance} cannot absorb {amount}")]
    BalanceOverflow {
        /// Value before the update.
        balance: Balance,
        /// Amount being applied.
        amount: Balance,
    },

    /// Frozen entries failed validation.
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Fatal errors of a protocol role.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message kind the role does not accept in its current state.
    #[error("participant {participant} got unexpected {kind} from {from}")]
    UnexpectedMessage {
        /// Local participant.
        participant: ParticipantId,
        /// Sender.
        from: ParticipantId,
        /// Kind received.
        kind: MessageKind,
    },

    /// TRANSFER delivered to an Account that is neither its source nor its
    /// destination.
    #[error("participant {participant} is not part of transfer {src} -> {dst}", src = .order.src, dst = .order.dst)]
    MisroutedTransfer {
        /// Local participant.
        participant: ParticipantId,
        /// Offending order.
        order: TransferOrder,
    },

    /// A transfer plan asked for an order that cannot be executed.
    #[error("invalid transfer {src} -> {dst} of {amount}: {reason}", src = .order.src, dst = .order.dst, amount = .order.amount)]
    InvalidTransfer {
        /// Offending order.
        order: TransferOrder,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// BALANCE_HISTORY whose embedded owner is not the sending peer.
    #[error("history from {from} claims owner {owner}")]
    HistoryOwner {
        /// Sending peer.
        from: ParticipantId,
        /// Owner embedded in the history.
        owner: ParticipantId,
    },

    /// Second BALANCE_HISTORY from the same Account.
    #[error("duplicate history from {0}")]
    DuplicateHistory(ParticipantId),

    /// Account ledger rejected an update.
    #[error("ledger of participant {participant}: {source}")]
    Ledger {
        /// Local participant.
        participant: ParticipantId,
        /// Ledger failure.
        #[source]
        source: LedgerError,
    },
}

impl ProtocolError {
    /// Exit status a participant process reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProtocolError::Transport(e) if e.is_protocol_violation() => exit::PROTOCOL,
            ProtocolError::Transport(_) => exit::TRANSPORT,
            ProtocolError::Ledger { .. } => exit::LEDGER,
            _ => exit::PROTOCOL,
        }
    }
}

/// Invalid run configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// At least one Account is required.
    #[error("number of processes must be a positive integer")]
    NoAccounts,

    /// More Accounts than the fabric supports.
    #[error("too many processes: {count} (max {max})")]
    TooManyAccounts {
        /// Requested Accounts.
        count: usize,
        /// Upper bound.
        max: usize,
    },

    /// `-p N` does not match the number of balances given.
    #[error("process and balances number mismatch: expected {expected} balances, got {actual}")]
    BalanceCountMismatch {
        /// Declared number of Accounts.
        expected: usize,
        /// Balances supplied.
        actual: usize,
    },

    /// Initial balances must be strictly positive.
    #[error("balance must be a positive integer: account {account} has {balance}")]
    NonPositiveBalance {
        /// Account with the bad balance.
        account: usize,
        /// The balance given.
        balance: i64,
    },

    /// The plan needs more timestamps than a balance history can hold.
    #[error("too many transfers: {count} (max {max} for this number of processes)")]
    TooManyTransfers {
        /// Transfers the plan would issue.
        count: usize,
        /// Upper bound for this run.
        max: usize,
    },

    /// Initial balances plus every planned amount do not fit in a [`Balance`].
    #[error("balances and transfer amounts overflow the balance range")]
    BalanceOverflow,
}

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Configuration rejected before any channel was created.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Channel fabric could not be built.
    #[error("channel setup failed: {0}")]
    Fabric(#[from] FabricError),

    /// `fork(2)` failed; children already created were terminated.
    #[error("failed to fork participant {participant}: {source}")]
    Fork {
        /// Account that could not be spawned.
        participant: ParticipantId,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// Tokio runtime could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),

    /// A log or report file could not be opened or written.
    #[error("failed to write {path}: {source}")]
    Output {
        /// File involved.
        path: String,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// JSON report could not be encoded.
    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),

    /// A role task panicked or was cancelled before reporting.
    #[error("role aborted: {reason}")]
    RoleAborted {
        /// Panic message, or why the task stopped.
        reason: String,
    },

    /// A participant's protocol role failed.
    #[error("participant {participant} failed: {source}")]
    Protocol {
        /// Failing participant.
        participant: ParticipantId,
        /// Role failure.
        #[source]
        source: ProtocolError,
    },
}

impl RunError {
    /// Exit status of the process for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => exit::USAGE,
            RunError::Protocol { source, .. } => source.exit_code(),
            RunError::RoleAborted { .. } => exit::PROTOCOL,
            RunError::Fabric(_)
            | RunError::Fork { .. }
            | RunError::Runtime(_)
            | RunError::Output { .. }
            | RunError::Report(_) => exit::SETUP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let transport = ProtocolError::Transport(TransportError::AllPeersClosed);
        assert_eq!(transport.exit_code(), exit::TRANSPORT);

        let wire = ProtocolError::Transport(TransportError::Wire {
            peer: ParticipantId::new(1),
            source: meshbank_transport::WireError::BadMagic { found: 0 },
        });
        assert_eq!(wire.exit_code(), exit::PROTOCOL);

        let ledger = ProtocolError::Ledger {
            participant: ParticipantId::new(1),
            source: LedgerError::HistoryFull { time: 600 },
        };
        assert_eq!(ledger.exit_code(), exit::LEDGER);

        assert_eq!(RunError::Config(ConfigError::NoAccounts).exit_code(), exit::USAGE);
        let run = RunError::Protocol {
            participant: ParticipantId::COORDINATOR,
            source: ledger,
        };
        assert_eq!(run.exit_code(), exit::LEDGER);

        let overflow = ProtocolError::Ledger {
            participant: ParticipantId::new(2),
            source: LedgerError::BalanceOverflow {
                balance: i64::MAX,
                amount: 1,
            },
        };
        assert_eq!(overflow.exit_code(), exit::LEDGER);

        let aborted = RunError::RoleAborted {
            reason: "plan panicked".to_string(),
        };
        assert_eq!(aborted.exit_code(), exit::PROTOCOL);
        assert_eq!(aborted.to_string(), "role aborted: plan panicked");
    }
}
