//! # meshbank-core
//!
//! Core abstractions shared by every meshbank participant.
//!
//! - **Identifiers and scalars**: [`ParticipantId`], [`Timestamp`], [`Balance`]
//! - **Logical time**: [`LamportClock`], one instance per participant, owned by
//!   that participant's protocol loop
//! - **Banking records**: [`TransferOrder`], [`BalanceState`], [`BalanceHistory`]
//!
//! ## Bounds
//!
//! The system only ever runs a handful of participants on one machine, so the
//! limits are compile-time constants:
//!
//! - [`MAX_PARTICIPANTS`]: Coordinator plus Accounts
//! - [`MAX_HISTORY_LEN`]: logical timestamps recorded per Account

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod banking;
mod time;
mod types;

pub use banking::{BalanceHistory, BalanceState, HistoryError, TransferOrder};
pub use time::LamportClock;
pub use types::{Balance, MAX_HISTORY_LEN, MAX_PARTICIPANTS, ParticipantId, Timestamp};
