//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;
use meshbank_core::Balance;

use crate::config::{DEFAULT_EVENTS_LOG, DEFAULT_PIPES_LOG, RunConfig};
use crate::error::ConfigError;
use crate::plan::PlanKind;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "meshbank")]
#[command(about = "Lamport-clocked banking ledger over a full mesh of pipes", long_about = None)]
pub struct Cli {
    /// Number of Accounts
    #[arg(short = 'p', value_name = "N")]
    pub processes: usize,

    /// Initial balance of each Account, one per Account
    #[arg(value_name = "BALANCE", allow_negative_numbers = true)]
    pub balances: Vec<Balance>,

    /// Transfer plan run once every Account has started
    #[arg(long, value_enum, default_value_t = PlanKind::ForwardCircle)]
    pub plan: PlanKind,

    /// Number of transfers issued by the random plan
    #[arg(long, default_value_t = 10)]
    pub transfers: usize,

    /// Seed for the random plan (random if not provided)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Largest amount of a random transfer
    #[arg(long, default_value_t = 10)]
    pub max_amount: Balance,

    /// Event log, appended to
    #[arg(long, default_value = DEFAULT_EVENTS_LOG)]
    pub events_log: PathBuf,

    /// Pipes log, appended to
    #[arg(long, default_value = DEFAULT_PIPES_LOG)]
    pub pipes_log: PathBuf,

    /// Also write the collected histories as JSON
    #[arg(long)]
    pub json_report: Option<PathBuf>,

    /// Run every participant in this process instead of forking
    #[arg(long)]
    pub local: bool,
}

impl Cli {
    /// Validate the arguments and build the run configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `-p` is out of range, does not match
    /// the number of balances, a balance is not positive, or the plan does
    /// not fit the history capacity or the balance range.
    pub fn into_config(self) -> Result<RunConfig, ConfigError> {
        if self.processes == 0 {
            return Err(ConfigError::NoAccounts);
        }
        if self.balances.len() != self.processes {
            return Err(ConfigError::BalanceCountMismatch {
                expected: self.processes,
                actual: self.balances.len(),
            });
        }

        let seed = self.seed.unwrap_or_else(rand::random);
        let config = RunConfig::new(self.balances)
            .with_plan(self.plan)
            .with_random(self.transfers, self.max_amount, seed)
            .with_events_log(Some(self.events_log))
            .with_pipes_log(Some(self.pipes_log))
            .with_json_report(self.json_report)
            .with_local(self.local);
        config.validate()?;
        Ok(config)
    }
}
