//! Coordinator-side aggregation of Account histories.
//!
//! [`AllHistory`] collects one frozen [`BalanceHistory`] per Account as
//! BALANCE_HISTORY messages arrive. [`HistoryReport`] squares the histories
//! off to a common time range and renders the classic table:
//!
//! ```text
//! Full balance history for time range [0;3]:
//!    Time |    0 |    1 |    2 |    3 |
//!       1 |  100 |  100 |   70 |   70 |
//!       2 |   50 |   50 |   50 |   80 |
//!   Total |  150 |  150 |  150 |  150 |
//! ```
//!
//! The `Total` row adds `pending_in` to each balance, so it stays constant
//! over time when no money is created or lost.

use std::collections::BTreeMap;
use std::fmt;

use meshbank_core::{Balance, BalanceHistory, ParticipantId, Timestamp};
use serde::Serialize;

use crate::error::ProtocolError;

/// Every Account's history, keyed by Account id.
#[derive(Debug, Clone, Default)]
pub struct AllHistory {
    account_count: usize,
    histories: BTreeMap<ParticipantId, BalanceHistory>,
}

impl AllHistory {
    /// Empty collection expecting `account_count` histories.
    pub fn new(account_count: usize) -> Self {
        Self {
            account_count,
            histories: BTreeMap::new(),
        }
    }

    /// Store the history received from `from`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HistoryOwner`] when the embedded owner is not `from`
    /// - [`ProtocolError::DuplicateHistory`] for a second history from one Account
    pub fn insert(
        &mut self,
        from: ParticipantId,
        history: BalanceHistory,
    ) -> Result<(), ProtocolError> {
        if history.owner() != from {
            return Err(ProtocolError::HistoryOwner {
                from,
                owner: history.owner(),
            });
        }
        if self.histories.contains_key(&from) {
            return Err(ProtocolError::DuplicateHistory(from));
        }
        self.histories.insert(from, history);
        Ok(())
    }

    /// Number of Accounts expected.
    pub fn account_count(&self) -> usize {
        self.account_count
    }

    /// Number of histories received.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Whether no history arrived yet.
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Whether every Account contributed.
    pub fn is_complete(&self) -> bool {
        self.histories.len() == self.account_count
    }

    /// History of `account`, if received.
    pub fn get(&self, account: ParticipantId) -> Option<&BalanceHistory> {
        self.histories.get(&account)
    }

    /// Histories in ascending Account order.
    pub fn iter(&self) -> impl Iterator<Item = &BalanceHistory> {
        self.histories.values()
    }

    /// Latest time covered by any history.
    pub fn max_time(&self) -> Timestamp {
        self.iter().map(BalanceHistory::last_time).max().unwrap_or(0)
    }

    /// Square the histories off into a printable report.
    pub fn report(&self) -> HistoryReport {
        let max_time = self.max_time();
        let times = 0..=max_time;

        let rows: Vec<ReportRow> = self
            .iter()
            .map(|history| ReportRow {
                account: history.owner(),
                balances: times
                    .clone()
                    .map(|t| history.state_at_or_last(t).balance)
                    .collect(),
            })
            .collect();

        // Histories come off the wire, so sum wide and clamp.
        let totals = times
            .map(|t| {
                let total: i128 = self
                    .iter()
                    .map(|history| {
                        let state = history.state_at_or_last(t);
                        i128::from(state.balance) + i128::from(state.pending_in)
                    })
                    .sum();
                Balance::try_from(total).unwrap_or(if total < 0 {
                    Balance::MIN
                } else {
                    Balance::MAX
                })
            })
            .collect();

        HistoryReport {
            max_time,
            rows,
            totals,
        }
    }

    /// JSON document with every history and the conservation check.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let report = self.report();
        serde_json::to_string_pretty(&JsonReport {
            max_time: report.max_time,
            conserved_total: report.conserved_total(),
            accounts: self.iter().collect(),
        })
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    max_time: Timestamp,
    conserved_total: Option<Balance>,
    accounts: Vec<&'a BalanceHistory>,
}

/// Balances of one Account over the report's time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    /// Account id.
    pub account: ParticipantId,
    /// Balance at each time `0..=max_time`.
    pub balances: Vec<Balance>,
}

/// Consolidated table over `[0; max_time]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryReport {
    /// Last time in the range.
    pub max_time: Timestamp,
    /// One row per Account, ascending id.
    pub rows: Vec<ReportRow>,
    /// `sum(balance + pending_in)` at each time.
    pub totals: Vec<Balance>,
}

impl HistoryReport {
    /// The total when it is the same at every time, `None` otherwise.
    pub fn conserved_total(&self) -> Option<Balance> {
        let first = *self.totals.first()?;
        self.totals.iter().all(|&t| t == first).then_some(first)
    }

    /// Final balance of every Account, ascending id.
    pub fn final_balances(&self) -> Vec<Balance> {
        self.rows
            .iter()
            .map(|row| row.balances.last().copied().unwrap_or_default())
            .collect()
    }
}

const LABEL_WIDTH: usize = 7;
const CELL_WIDTH: usize = 4;

fn write_row(
    f: &mut fmt::Formatter<'_>,
    label: &dyn fmt::Display,
    cells: impl Iterator<Item = String>,
) -> fmt::Result {
    write!(f, "{:>LABEL_WIDTH$} |", label.to_string())?;
    for cell in cells {
        write!(f, " {cell:>CELL_WIDTH$} |")?;
    }
    writeln!(f)
}

impl fmt::Display for HistoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Full balance history for time range [0;{}]:",
            self.max_time
        )?;
        write_row(f, &"Time", (0..=self.max_time).map(|t| t.to_string()))?;
        for row in &self.rows {
            write_row(f, &row.account, row.balances.iter().map(|b| b.to_string()))?;
        }
        write_row(f, &"Total", self.totals.iter().map(|b| b.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use meshbank_core::BalanceState;

    use super::*;

    fn id(raw: i8) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn history(owner: i8, states: &[(Balance, Balance)]) -> BalanceHistory {
        let entries = states
            .iter()
            .enumerate()
            .map(|(t, &(balance, pending_in))| BalanceState {
                time: t as Timestamp,
                balance,
                pending_in,
            })
            .collect();
        BalanceHistory::from_entries(id(owner), entries).expect("valid history")
    }

    fn scenario_b() -> AllHistory {
        let mut all = AllHistory::new(2);
        all.insert(id(1), history(1, &[(100, 0), (100, 0), (70, 0)]))
            .expect("insert 1");
        all.insert(
            id(2),
            history(2, &[(50, 0), (50, 0), (50, 30), (50, 30), (80, 0)]),
        )
        .expect("insert 2");
        all
    }

    #[test]
    fn test_insert_checks_owner_and_duplicates() {
        let mut all = AllHistory::new(2);
        assert!(matches!(
            all.insert(id(2), history(1, &[(10, 0)])),
            Err(ProtocolError::HistoryOwner { .. })
        ));
        all.insert(id(1), history(1, &[(10, 0)])).expect("first");
        assert!(matches!(
            all.insert(id(1), history(1, &[(10, 0)])),
            Err(ProtocolError::DuplicateHistory(_))
        ));
        assert!(!all.is_complete());
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_report_extends_short_histories() {
        let report = scenario_b().report();
        assert_eq!(report.max_time, 4);
        assert_eq!(report.rows[0].balances, vec![100, 100, 70, 70, 70]);
        assert_eq!(report.rows[1].balances, vec![50, 50, 50, 50, 80]);
        assert_eq!(report.totals, vec![150; 5]);
        assert_eq!(report.conserved_total(), Some(150));
        assert_eq!(report.final_balances(), vec![70, 80]);
    }

    #[test]
    fn test_conservation_violation_is_detected() {
        let mut all = AllHistory::new(2);
        all.insert(id(1), history(1, &[(100, 0), (70, 0)]))
            .expect("insert 1");
        all.insert(id(2), history(2, &[(50, 0), (50, 0)]))
            .expect("insert 2");
        assert_eq!(all.report().conserved_total(), None);
    }

    #[test]
    fn test_table_layout() {
        let text = scenario_b().report().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Full balance history for time range [0;4]:");
        assert_eq!(lines[1], "   Time |    0 |    1 |    2 |    3 |    4 |");
        assert_eq!(lines[2], "      1 |  100 |  100 |   70 |   70 |   70 |");
        assert_eq!(lines[4], "  Total |  150 |  150 |  150 |  150 |  150 |");
    }

    #[test]
    fn test_json_report() {
        let json = scenario_b().to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["conserved_total"], 150);
        assert_eq!(value["max_time"], 4);
        assert_eq!(value["accounts"][1]["owner"], 2);
        assert_eq!(value["accounts"][1]["entries"][2]["pending_in"], 30);
    }

    #[test]
    fn test_totals_saturate_instead_of_wrapping() {
        let mut all = AllHistory::new(2);
        all.insert(id(1), history(1, &[(i64::MAX, 0), (i64::MAX, 5)]))
            .expect("insert 1");
        all.insert(id(2), history(2, &[(i64::MIN, 0), (i64::MIN, -5)]))
            .expect("insert 2");
        assert_eq!(all.report().totals, vec![-1, -1]);

        let mut all = AllHistory::new(2);
        all.insert(id(1), history(1, &[(i64::MAX, 0)])).expect("insert 1");
        all.insert(id(2), history(2, &[(1, 0)])).expect("insert 2");
        let report = all.report();
        assert_eq!(report.totals, vec![i64::MAX]);
        assert_eq!(report.conserved_total(), Some(i64::MAX));
    }
}
