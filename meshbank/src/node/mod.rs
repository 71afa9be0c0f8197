//! Protocol roles.
//!
//! Both roles move through the same phases, driven only by received-message
//! counts:
//!
//! ```text
//! AwaitPeers -> Active -> AwaitShutdown -> Terminated
//! ```
//!
//! Each role owns its [`LamportClock`](meshbank_core::LamportClock) and its
//! [`Transport`](meshbank_transport::Transport); every received message is
//! merged into the clock before it is dispatched.

mod account;
mod coordinator;

pub use account::{Account, AccountReport};
pub use coordinator::{Coordinator, CoordinatorReport, TransferIssuer, TransferOutcome};

/// Lifecycle phase of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for every STARTED.
    AwaitPeers,
    /// Transfers may flow.
    Active,
    /// STOP seen (Account) or sent (Coordinator); draining DONE and histories.
    AwaitShutdown,
    /// Loop finished.
    Terminated,
}
