//! Identifiers and scalar types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lamport timestamp.
pub type Timestamp = u64;

/// Account balance. Signed: nothing prevents a transfer from overdrawing.
pub type Balance = i64;

/// Maximum number of participants in one run, Coordinator included.
pub const MAX_PARTICIPANTS: usize = 16;

/// Maximum number of timestamps an Account history may cover.
pub const MAX_HISTORY_LEN: usize = 512;

/// Identifier of a participant within a run.
///
/// `0` is the Coordinator, `1..N` are Accounts. Always in
/// `0..MAX_PARTICIPANTS`, so it can index per-peer tables directly.
///
/// # Examples
///
/// ```
/// use meshbank_core::ParticipantId;
///
/// let account = ParticipantId::new(3);
/// assert_eq!(account.index(), 3);
/// assert!(!account.is_coordinator());
/// assert!(ParticipantId::COORDINATOR.is_coordinator());
/// assert!(ParticipantId::from_raw(-1).is_none());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i8", into = "i8")]
pub struct ParticipantId(i8);

impl ParticipantId {
    /// The Coordinator (bank client) participant.
    pub const COORDINATOR: ParticipantId = ParticipantId(0);

    /// Create an id from a raw value known to be in range.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is negative or not below [`MAX_PARTICIPANTS`].
    pub const fn new(raw: i8) -> Self {
        assert!(raw >= 0 && (raw as usize) < MAX_PARTICIPANTS);
        Self(raw)
    }

    /// Create an id from a raw wire value, rejecting out-of-range values.
    pub const fn from_raw(raw: i8) -> Option<Self> {
        if raw >= 0 && (raw as usize) < MAX_PARTICIPANTS {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Create an id from a table index.
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_PARTICIPANTS {
            Some(Self(index as i8))
        } else {
            None
        }
    }

    /// Raw wire value.
    pub const fn raw(self) -> i8 {
        self.0
    }

    /// Position in per-participant tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the Coordinator.
    pub const fn is_coordinator(self) -> bool {
        self.0 == 0
    }

    /// Ids `1..=count` of the Accounts in a run with `count` Accounts.
    pub fn accounts(count: usize) -> impl Iterator<Item = ParticipantId> {
        (1..=count).filter_map(Self::from_index)
    }
}

impl TryFrom<i8> for ParticipantId {
    type Error = String;

    fn try_from(raw: i8) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or_else(|| format!("participant id out of range: {raw}"))
    }
}

impl From<ParticipantId> for i8 {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
