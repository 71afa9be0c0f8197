//! Per-Account balance trace with pending-transfer accounting.
//!
//! The ledger is a right-continuous step function of logical time: recording
//! a change at time `t` fills every timestamp between the last recorded one
//! and `t` with the previous balance, then stores the new balance at `t`.
//!
//! Every incoming transfer is remembered as a [`PendingTransfer`] so that
//! `pending_in` at any time `t` is the sum of the transfers sent at or before
//! `t` and applied after it.

use meshbank_core::{
    Balance, BalanceHistory, BalanceState, MAX_HISTORY_LEN, ParticipantId, Timestamp,
};

use crate::error::LedgerError;

/// An incoming transfer, kept by the receiving Account only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Sender's logical time for the TRANSFER message.
    pub sent_at: Timestamp,
    /// Receiver's logical time once the message was observed.
    pub received_at: Timestamp,
    /// Amount credited.
    pub amount: Balance,
}

impl PendingTransfer {
    /// Whether the transfer is in flight at `time`: `sent_at <= time < received_at`.
    pub fn in_flight_at(&self, time: Timestamp) -> bool {
        self.sent_at <= time && time < self.received_at
    }
}

/// Mutable, gap-free balance trace of one Account.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    owner: ParticipantId,
    entries: Vec<BalanceState>,
    pending: Vec<PendingTransfer>,
}

impl HistoryLedger {
    /// Start a ledger with the single entry `{0, initial, 0}`.
    pub fn new(owner: ParticipantId, initial: Balance) -> Self {
        Self {
            owner,
            entries: vec![BalanceState {
                time: 0,
                balance: initial,
                pending_in: 0,
            }],
            pending: Vec::new(),
        }
    }

    /// Account owning the ledger.
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    /// Current balance, i.e. the balance at the last recorded time.
    pub fn balance(&self) -> Balance {
        self.last().balance
    }

    /// Last recorded logical time.
    pub fn last_time(&self) -> Timestamp {
        self.last().time
    }

    /// Recorded entries, entry `i` at time `i`.
    pub fn entries(&self) -> &[BalanceState] {
        &self.entries
    }

    /// Incoming transfers recorded so far.
    pub fn pending_transfers(&self) -> &[PendingTransfer] {
        &self.pending
    }

    /// Sum of the amounts in flight at `time`.
    pub fn pending_at(&self, time: Timestamp) -> Balance {
        self.pending
            .iter()
            .filter(|transfer| transfer.in_flight_at(time))
            .map(|transfer| transfer.amount)
            .sum()
    }

    fn last(&self) -> BalanceState {
        // `new` seeds time 0 and entries are never removed.
        let Some(last) = self.entries.last() else {
            return BalanceState::default();
        };
        *last
    }

    /// Record `balance` at time `to`, filling the gap with the previous balance.
    ///
    /// Recording at the last recorded time overwrites its balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TimeRegression`] when `to` is before the last recorded time
    /// - [`LedgerError::HistoryFull`] when `to` does not fit in [`MAX_HISTORY_LEN`]
    pub fn fill_to(&mut self, to: Timestamp, balance: Balance) -> Result<(), LedgerError> {
        let last = self.last_time();
        if to < last {
            return Err(LedgerError::TimeRegression {
                last,
                requested: to,
            });
        }
        if to >= MAX_HISTORY_LEN as Timestamp {
            return Err(LedgerError::HistoryFull { time: to });
        }

        let base = self.balance();
        if to == last {
            if let Some(entry) = self.entries.last_mut() {
                entry.balance = balance;
            }
            return Ok(());
        }
        for time in last + 1..=to {
            let state = BalanceState {
                time,
                balance: if time < to { base } else { balance },
                pending_in: self.pending_at(time),
            };
            self.entries.push(state);
        }
        Ok(())
    }

    /// Extend the trace to `to` without changing the balance.
    pub fn advance_to(&mut self, to: Timestamp) -> Result<(), LedgerError> {
        let balance = self.balance();
        self.fill_to(to, balance)
    }

    /// Debit `amount` at time `at`. Returns the new balance.
    ///
    /// No floor is enforced: the balance may go negative.
    ///
    /// # Errors
    ///
    /// [`LedgerError::BalanceOverflow`] when the debit leaves the [`Balance`]
    /// range, plus the errors of [`HistoryLedger::fill_to`]. A failed call
    /// records nothing.
    pub fn record_outgoing(
        &mut self,
        at: Timestamp,
        amount: Balance,
    ) -> Result<Balance, LedgerError> {
        let current = self.balance();
        let balance = current
            .checked_sub(amount)
            .ok_or(LedgerError::BalanceOverflow {
                balance: current,
                amount,
            })?;
        self.fill_to(at, balance)?;
        Ok(balance)
    }

    /// Credit a transfer sent at `sent_at` and observed at `received_at`.
    /// Returns the new balance.
    ///
    /// Entries already recorded inside `[sent_at, received_at)` get the amount
    /// added to their `pending_in`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TimeRegression`] when `received_at` is before the last
    ///   recorded time
    /// - [`LedgerError::HistoryFull`] when `received_at` does not fit
    /// - [`LedgerError::BalanceOverflow`] when the balance or the sum of
    ///   recorded incoming amounts leaves the [`Balance`] range
    ///
    /// A failed call records nothing.
    pub fn record_incoming(
        &mut self,
        sent_at: Timestamp,
        received_at: Timestamp,
        amount: Balance,
    ) -> Result<Balance, LedgerError> {
        let last = self.last_time();
        if received_at < last {
            return Err(LedgerError::TimeRegression {
                last,
                requested: received_at,
            });
        }
        if received_at >= MAX_HISTORY_LEN as Timestamp {
            return Err(LedgerError::HistoryFull { time: received_at });
        }

        let current = self.balance();
        let balance = current
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow {
                balance: current,
                amount,
            })?;
        // Every pending_in is a sum over a subset of the recorded amounts, so
        // bounding the whole sum bounds each of them.
        self.pending
            .iter()
            .try_fold(amount, |sum, transfer| sum.checked_add(transfer.amount))
            .ok_or(LedgerError::BalanceOverflow {
                balance: self.pending_at(last),
                amount,
            })?;

        let transfer = PendingTransfer {
            sent_at,
            received_at,
            amount,
        };
        for entry in self.entries.iter_mut() {
            if transfer.in_flight_at(entry.time) {
                entry.pending_in += amount;
            }
        }
        self.pending.push(transfer);

        self.fill_to(received_at, balance)?;
        Ok(balance)
    }

    /// Freeze into a publishable [`BalanceHistory`].
    pub fn freeze(self) -> Result<BalanceHistory, LedgerError> {
        Ok(BalanceHistory::from_entries(self.owner, self.entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(initial: Balance) -> HistoryLedger {
        HistoryLedger::new(ParticipantId::new(1), initial)
    }

    fn balances(ledger: &HistoryLedger) -> Vec<Balance> {
        ledger.entries().iter().map(|e| e.balance).collect()
    }

    fn pendings(ledger: &HistoryLedger) -> Vec<Balance> {
        ledger.entries().iter().map(|e| e.pending_in).collect()
    }

    #[test]
    fn test_new_ledger_has_time_zero() {
        let ledger = ledger(100);
        assert_eq!(ledger.last_time(), 0);
        assert_eq!(ledger.balance(), 100);
        assert_eq!(pendings(&ledger), vec![0]);
    }

    #[test]
    fn test_outgoing_fills_gap_with_previous_balance() {
        let mut ledger = ledger(100);
        let balance = ledger.record_outgoing(4, 30).expect("debit");
        assert_eq!(balance, 70);
        assert_eq!(balances(&ledger), vec![100, 100, 100, 100, 70]);
        for (i, entry) in ledger.entries().iter().enumerate() {
            assert_eq!(entry.time, i as Timestamp);
        }
    }

    #[test]
    fn test_incoming_sets_pending_window() {
        let mut ledger = ledger(50);
        let balance = ledger.record_incoming(2, 5, 30).expect("credit");
        assert_eq!(balance, 80);
        assert_eq!(balances(&ledger), vec![50, 50, 50, 50, 50, 80]);
        assert_eq!(pendings(&ledger), vec![0, 0, 30, 30, 30, 0]);
    }

    #[test]
    fn test_incoming_updates_already_recorded_entries() {
        let mut ledger = ledger(50);
        // Local activity pushed the trace to time 6 before the transfer arrived.
        ledger.record_outgoing(6, 5).expect("debit");
        ledger.record_incoming(3, 9, 10).expect("credit");

        assert_eq!(pendings(&ledger), vec![0, 0, 0, 10, 10, 10, 10, 10, 10, 0]);
        for entry in ledger.entries() {
            assert_eq!(entry.pending_in, ledger.pending_at(entry.time));
        }
    }

    #[test]
    fn test_overlapping_transfers_sum() {
        let mut ledger = ledger(0);
        ledger.record_incoming(1, 4, 5).expect("first");
        ledger.record_incoming(2, 6, 7).expect("second");
        assert_eq!(ledger.pending_at(3), 12);
        assert_eq!(ledger.pending_at(5), 7);
        assert_eq!(ledger.pending_at(6), 0);
        assert_eq!(ledger.balance(), 12);
    }

    #[test]
    fn test_overdraft_is_allowed() {
        let mut ledger = ledger(10);
        assert_eq!(ledger.record_outgoing(1, 25).expect("debit"), -15);
    }

    #[test]
    fn test_time_regression_is_rejected() {
        let mut ledger = ledger(10);
        ledger.advance_to(5).expect("advance");
        assert_eq!(
            ledger.record_outgoing(3, 1),
            Err(LedgerError::TimeRegression {
                last: 5,
                requested: 3
            })
        );
        assert!(ledger.record_incoming(1, 4, 1).is_err());
        // Nothing was recorded by the failed calls.
        assert!(ledger.pending_transfers().is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let mut ledger = ledger(10);
        let limit = MAX_HISTORY_LEN as Timestamp;
        ledger.advance_to(limit - 1).expect("last slot fits");
        assert_eq!(
            ledger.advance_to(limit),
            Err(LedgerError::HistoryFull { time: limit })
        );
    }

    #[test]
    fn test_balance_overflow_is_rejected() {
        let mut ledger = ledger(i64::MAX - 1);
        assert_eq!(
            ledger.record_incoming(0, 2, 5),
            Err(LedgerError::BalanceOverflow {
                balance: i64::MAX - 1,
                amount: 5
            })
        );
        // Nothing was recorded by the failed call.
        assert_eq!(ledger.last_time(), 0);
        assert!(ledger.pending_transfers().is_empty());
        assert_eq!(ledger.record_incoming(0, 2, 1).expect("fits"), i64::MAX);

        let mut ledger = HistoryLedger::new(ParticipantId::new(2), i64::MIN + 3);
        assert!(matches!(
            ledger.record_outgoing(1, 4),
            Err(LedgerError::BalanceOverflow { .. })
        ));
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.record_outgoing(1, 3).expect("fits"), i64::MIN);
    }

    #[test]
    fn test_pending_sum_overflow_is_rejected() {
        let mut ledger = ledger(i64::MIN);
        ledger.record_incoming(1, 5, i64::MAX).expect("first");
        assert_eq!(ledger.balance(), -1);
        // The balance would fit, but two overlapping windows cannot be summed.
        assert!(matches!(
            ledger.record_incoming(2, 6, 1),
            Err(LedgerError::BalanceOverflow { amount: 1, .. })
        ));
        assert_eq!(ledger.pending_transfers().len(), 1);
        assert_eq!(ledger.pending_at(3), i64::MAX);
    }

    #[test]
    fn test_incoming_past_capacity_records_nothing() {
        let mut ledger = ledger(10);
        let limit = MAX_HISTORY_LEN as Timestamp;
        assert_eq!(
            ledger.record_incoming(0, limit, 5),
            Err(LedgerError::HistoryFull { time: limit })
        );
        assert!(ledger.pending_transfers().is_empty());
        assert_eq!(pendings(&ledger), vec![0]);
    }

    #[test]
    fn test_freeze_keeps_entries() {
        let mut ledger = ledger(10);
        ledger.record_outgoing(2, 3).expect("debit");
        let history = ledger.freeze().expect("freeze");
        assert_eq!(history.owner(), ParticipantId::new(1));
        assert_eq!(history.len(), 3);
        assert_eq!(history.final_balance(), 7);
    }
}
