//! # meshbank
//!
//! A toy bank whose Accounts are separate OS processes connected by a full
//! mesh of pipes and ordered by Lamport clocks.
//!
//! A run has one Coordinator (participant 0) and `N` Accounts (`1..=N`):
//!
//! 1. every Account multicasts STARTED; the Coordinator waits for all of them
//! 2. the Coordinator runs a [`TransferPlan`], one acknowledged transfer at a time
//! 3. the Coordinator multicasts STOP; Accounts answer with DONE
//! 4. each Account sends its [`BalanceHistory`](meshbank_core::BalanceHistory)
//!    to the Coordinator, which prints the [`HistoryReport`]
//!
//! Every history records, per logical time, the balance and the money sent
//! to it but not yet received, so the per-time totals stay constant.
//!
//! [`run_forked`] spawns one process per Account; [`run_local`] runs the same
//! roles as tasks of one runtime.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod cli;
mod config;
mod error;
mod events;
mod history;
mod ledger;
mod logging;
mod node;
mod plan;
mod runner;

pub use cli::Cli;
pub use config::{DEFAULT_EVENTS_LOG, DEFAULT_PIPES_LOG, RunConfig};
pub use error::{ConfigError, LedgerError, ProtocolError, RunError, exit};
pub use events::{EventSink, LedgerEvent, RecordingSink, TracingSink};
pub use history::{AllHistory, HistoryReport, ReportRow};
pub use ledger::{HistoryLedger, PendingTransfer};
pub use logging::{EventLog, PipesLog, init_tracing};
pub use node::{
    Account, AccountReport, Coordinator, CoordinatorReport, Phase, TransferIssuer,
    TransferOutcome,
};
pub use plan::{PlanKind, RandomPlan, ScriptedPlan, TransferPlan};
pub use runner::{ChildStatus, ForkedRun, LocalRun, run_forked, run_local, run_local_blocking};
