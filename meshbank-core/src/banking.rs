//! Banking records exchanged between participants.
//!
//! - [`TransferOrder`]: what the Coordinator asks an Account to move
//! - [`BalanceState`]: one point of an Account's balance trace
//! - [`BalanceHistory`]: the complete, frozen trace an Account publishes at
//!   shutdown

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Balance, MAX_HISTORY_LEN, ParticipantId, Timestamp};

/// A request to move `amount` from `src` to `dst`.
///
/// No legality checks are attached: an order may overdraw `src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferOrder {
    /// Account debited.
    pub src: ParticipantId,
    /// Account credited.
    pub dst: ParticipantId,
    /// Amount moved.
    pub amount: Balance,
}

impl TransferOrder {
    /// Create a new transfer order.
    pub const fn new(src: ParticipantId, dst: ParticipantId, amount: Balance) -> Self {
        Self { src, dst, amount }
    }
}

/// Balance of one Account at one logical time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceState {
    /// Logical time of this snapshot.
    pub time: Timestamp,
    /// Balance at `time`.
    pub balance: Balance,
    /// Sum of incoming transfers sent at or before `time` but applied after it.
    pub pending_in: Balance,
}

/// Errors raised when assembling a [`BalanceHistory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// A history always has at least the entry for time 0.
    #[error("balance history is empty")]
    Empty,

    /// Entries must be indexed `0, 1, 2, ...` without gaps.
    #[error("balance history not contiguous: expected time {expected}, found {found}")]
    NotContiguous {
        /// Timestamp required at this position.
        expected: Timestamp,
        /// Timestamp actually found.
        found: Timestamp,
    },

    /// History covers more timestamps than the run allows.
    #[error("balance history too long: {len} entries (max {MAX_HISTORY_LEN})")]
    TooLong {
        /// Number of entries offered.
        len: usize,
    },
}

/// Frozen, gap-free balance trace of one Account.
///
/// Entry `i` always describes logical time `i`. Once built the history is
/// read-only; the only way to create one is [`BalanceHistory::from_entries`],
/// which checks contiguity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHistory {
    owner: ParticipantId,
    entries: Vec<BalanceState>,
}

impl BalanceHistory {
    /// Build a history, validating that `entries` cover `[0, len)` in order.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::Empty`] when `entries` is empty
    /// - [`HistoryError::TooLong`] beyond [`MAX_HISTORY_LEN`]
    /// - [`HistoryError::NotContiguous`] when entry `i` is not at time `i`
    pub fn from_entries(
        owner: ParticipantId,
        entries: Vec<BalanceState>,
    ) -> Result<Self, HistoryError> {
        if entries.is_empty() {
            return Err(HistoryError::Empty);
        }
        if entries.len() > MAX_HISTORY_LEN {
            return Err(HistoryError::TooLong { len: entries.len() });
        }
        for (expected, entry) in entries.iter().enumerate() {
            let expected = expected as Timestamp;
            if entry.time != expected {
                return Err(HistoryError::NotContiguous {
                    expected,
                    found: entry.time,
                });
            }
        }
        Ok(Self { owner, entries })
    }

    /// Account that produced this history.
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    /// All entries, entry `i` at time `i`.
    pub fn entries(&self) -> &[BalanceState] {
        &self.entries
    }

    /// Number of recorded timestamps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a validated history; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last recorded logical time.
    pub fn last_time(&self) -> Timestamp {
        self.entries.len().saturating_sub(1) as Timestamp
    }

    /// State at `time`, or `None` past the end of the history.
    pub fn state_at(&self, time: Timestamp) -> Option<&BalanceState> {
        usize::try_from(time).ok().and_then(|t| self.entries.get(t))
    }

    /// State at `time`, extended with the last known state past the end.
    ///
    /// An empty history reads as a zero balance at every time.
    pub fn state_at_or_last(&self, time: Timestamp) -> BalanceState {
        if let Some(state) = self.state_at(time) {
            return *state;
        }
        let Some(last) = self.entries.last() else {
            return BalanceState {
                time,
                ..BalanceState::default()
            };
        };
        BalanceState { time, ..*last }
    }

    /// Balance at the last recorded time, zero for an empty history.
    pub fn final_balance(&self) -> Balance {
        self.entries.last().map_or(0, |state| state.balance)
    }
}
