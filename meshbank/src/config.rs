//! Run configuration.

use std::path::PathBuf;
use std::rc::Rc;

use meshbank_core::{Balance, MAX_HISTORY_LEN, MAX_PARTICIPANTS};

use crate::error::ConfigError;
use crate::plan::{PlanKind, RandomPlan, ScriptedPlan, TransferPlan};

/// Default file for the event log.
pub const DEFAULT_EVENTS_LOG: &str = "events.log";

/// Default file for the pipes log.
pub const DEFAULT_PIPES_LOG: &str = "pipes.log";

/// Logical ticks one transfer adds to the longest clock: Coordinator send,
/// source receive and forward, destination receive and ACK, Coordinator
/// receive.
const TICKS_PER_TRANSFER: usize = 6;

/// Startup and shutdown ticks reserved per participant.
const TICKS_PER_PARTICIPANT: usize = 4;

/// Everything needed to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Initial balance of Account `i + 1` at index `i`.
    pub balances: Vec<Balance>,
    /// Transfer plan shape.
    pub plan: PlanKind,
    /// Number of transfers for the random plan.
    pub transfers: usize,
    /// Seed for the random plan.
    pub seed: u64,
    /// Upper bound of a random transfer amount.
    pub max_amount: Balance,
    /// Event log file, appended to. `None` disables it.
    pub events_log: Option<PathBuf>,
    /// Pipes log file, appended to. `None` disables it.
    pub pipes_log: Option<PathBuf>,
    /// Where to write the JSON report, if anywhere.
    pub json_report: Option<PathBuf>,
    /// Run every participant in this process instead of forking.
    pub local: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            balances: Vec::new(),
            plan: PlanKind::default(),
            transfers: 10,
            seed: 0,
            max_amount: 10,
            events_log: Some(PathBuf::from(DEFAULT_EVENTS_LOG)),
            pipes_log: Some(PathBuf::from(DEFAULT_PIPES_LOG)),
            json_report: None,
            local: false,
        }
    }
}

impl RunConfig {
    /// Configuration for Accounts with the given initial balances.
    pub fn new(balances: Vec<Balance>) -> Self {
        Self {
            balances,
            ..Self::default()
        }
    }

    /// Configuration that writes no files, for tests.
    pub fn quiet(balances: Vec<Balance>) -> Self {
        Self::new(balances)
            .with_events_log(None)
            .with_pipes_log(None)
    }

    /// Select the transfer plan.
    pub fn with_plan(mut self, plan: PlanKind) -> Self {
        self.plan = plan;
        self
    }

    /// Parameters of the random plan.
    pub fn with_random(mut self, transfers: usize, max_amount: Balance, seed: u64) -> Self {
        self.transfers = transfers;
        self.max_amount = max_amount;
        self.seed = seed;
        self
    }

    /// Event log destination.
    pub fn with_events_log(mut self, path: Option<PathBuf>) -> Self {
        self.events_log = path;
        self
    }

    /// Pipes log destination.
    pub fn with_pipes_log(mut self, path: Option<PathBuf>) -> Self {
        self.pipes_log = path;
        self
    }

    /// JSON report destination.
    pub fn with_json_report(mut self, path: Option<PathBuf>) -> Self {
        self.json_report = path;
        self
    }

    /// Run in one process.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Number of Accounts.
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    /// Accounts plus the Coordinator.
    pub fn participant_count(&self) -> usize {
        self.balances.len() + 1
    }

    /// Sum of initial balances, saturating at the [`Balance`] range.
    pub fn initial_total(&self) -> Balance {
        self.balances
            .iter()
            .fold(0, |total: Balance, &balance| total.saturating_add(balance))
    }

    /// Transfers the configured plan issues.
    pub fn planned_transfers(&self) -> usize {
        match self.plan.orders(self.account_count()) {
            Some(orders) => orders.len(),
            None if self.account_count() < 2 => 0,
            None => self.transfers,
        }
    }

    /// Most transfers whose timestamps still fit in a balance history.
    pub fn max_transfers(&self) -> usize {
        (MAX_HISTORY_LEN - 1).saturating_sub(TICKS_PER_PARTICIPANT * self.participant_count())
            / TICKS_PER_TRANSFER
    }

    /// Sum of every amount the configured plan moves.
    fn planned_volume(&self) -> i128 {
        match self.plan.orders(self.account_count()) {
            Some(orders) => orders
                .iter()
                .map(|order| i128::from(order.amount.unsigned_abs()))
                .sum(),
            None => self.planned_transfers() as i128 * i128::from(self.max_amount.max(1)),
        }
    }

    /// Check the bounds enforced before any channel exists.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NoAccounts`] for an empty balance list
    /// - [`ConfigError::TooManyAccounts`] past `MAX_PARTICIPANTS - 1`
    /// - [`ConfigError::NonPositiveBalance`] for any balance `<= 0`
    /// - [`ConfigError::TooManyTransfers`] past [`RunConfig::max_transfers`]
    /// - [`ConfigError::BalanceOverflow`] when the initial total plus every
    ///   planned amount leaves the [`Balance`] range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.balances.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        let max = MAX_PARTICIPANTS - 1;
        if self.balances.len() > max {
            return Err(ConfigError::TooManyAccounts {
                count: self.balances.len(),
                max,
            });
        }
        if let Some((index, &balance)) = self.balances.iter().enumerate().find(|&(_, &b)| b <= 0) {
            return Err(ConfigError::NonPositiveBalance {
                account: index + 1,
                balance,
            });
        }

        let count = self.planned_transfers();
        let max = self.max_transfers();
        if count > max {
            return Err(ConfigError::TooManyTransfers { count, max });
        }
        // Bounds every balance and every pending sum for the whole run.
        let total: i128 = self.balances.iter().copied().map(i128::from).sum();
        if total + self.planned_volume() > i128::from(Balance::MAX) {
            return Err(ConfigError::BalanceOverflow);
        }
        Ok(())
    }

    /// Instantiate the selected plan.
    pub fn build_plan(&self) -> Rc<dyn TransferPlan> {
        match ScriptedPlan::from_kind(self.plan, self.account_count()) {
            Some(plan) => Rc::new(plan),
            None => Rc::new(RandomPlan::new(self.transfers, self.max_amount, self.seed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::new(vec![10, 20]);
        assert_eq!(config.plan, PlanKind::ForwardCircle);
        assert_eq!(config.events_log, Some(PathBuf::from("events.log")));
        assert_eq!(config.participant_count(), 3);
        assert_eq!(config.initial_total(), 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert_eq!(RunConfig::new(vec![]).validate(), Err(ConfigError::NoAccounts));
        assert_eq!(
            RunConfig::new(vec![5; 16]).validate(),
            Err(ConfigError::TooManyAccounts { count: 16, max: 15 })
        );
        assert!(RunConfig::new(vec![5; 15]).validate().is_ok());
        assert_eq!(
            RunConfig::new(vec![5, 0, 3]).validate(),
            Err(ConfigError::NonPositiveBalance {
                account: 2,
                balance: 0
            })
        );
    }

    #[test]
    fn test_transfer_count_is_bounded_by_history_capacity() {
        let random = |transfers| {
            RunConfig::new(vec![10, 10])
                .with_plan(PlanKind::Random)
                .with_random(transfers, 5, 1)
        };
        assert_eq!(random(0).max_transfers(), 83);
        assert!(random(83).validate().is_ok());
        assert_eq!(
            random(200).validate(),
            Err(ConfigError::TooManyTransfers { count: 200, max: 83 })
        );
        // A single Account never receives a random transfer.
        let single = RunConfig::new(vec![10])
            .with_plan(PlanKind::Random)
            .with_random(10_000, 5, 1);
        assert_eq!(single.planned_transfers(), 0);
        assert!(single.validate().is_ok());

        // Every built-in shape fits at the largest mesh.
        for plan in [
            PlanKind::ForwardCircle,
            PlanKind::BackwardCircle,
            PlanKind::Star,
            PlanKind::RobinHood,
        ] {
            let config = RunConfig::new(vec![5; 15]).with_plan(plan);
            assert!(config.validate().is_ok(), "{}", plan.name());
        }
    }

    #[test]
    fn test_balance_range_is_checked() {
        assert_eq!(
            RunConfig::new(vec![i64::MAX, 1]).validate(),
            Err(ConfigError::BalanceOverflow)
        );
        assert_eq!(RunConfig::new(vec![i64::MAX, 1]).initial_total(), i64::MAX);

        // Room for the balances alone is not enough: amounts are added too.
        let near_max = RunConfig::new(vec![i64::MAX - 100, 1])
            .with_plan(PlanKind::Random)
            .with_random(20, 10, 3);
        assert_eq!(near_max.validate(), Err(ConfigError::BalanceOverflow));
        assert!(near_max.with_random(5, 10, 3).validate().is_ok());
    }

    #[test]
    fn test_builder_and_plan_selection() {
        let config = RunConfig::quiet(vec![1, 2, 3])
            .with_plan(PlanKind::Random)
            .with_random(7, 3, 99)
            .with_local(true);
        assert!(config.events_log.is_none());
        assert!(config.local);
        assert_eq!(config.build_plan().name(), "random");
        assert_eq!(
            RunConfig::new(vec![1, 2]).with_plan(PlanKind::Star).build_plan().name(),
            "star"
        );
    }
}
