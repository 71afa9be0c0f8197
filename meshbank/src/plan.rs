//! Transfer plans: what the Coordinator does once every Account is up.
//!
//! A plan receives a [`TransferIssuer`] and issues zero or more transfers
//! through it, one at a time. Fixed shapes are expressed as order lists
//! ([`PlanKind::orders`]); `random` draws from a seeded ChaCha generator so a
//! run can be replayed.

use async_trait::async_trait;
use meshbank_core::{Balance, ParticipantId, TransferOrder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::ProtocolError;
use crate::node::{TransferIssuer, TransferOutcome};

/// Transfer generation strategy run by the Coordinator.
#[async_trait(?Send)]
pub trait TransferPlan {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Issue transfers. Returns once every transfer was answered.
    async fn execute(&self, issuer: &mut TransferIssuer<'_>) -> Result<(), ProtocolError>;
}

/// Built-in plan shapes, selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PlanKind {
    /// No transfers.
    None,
    /// `i -> i+1` for `$i`, then `N -> 1` for `$1`.
    #[default]
    ForwardCircle,
    /// `i -> i-1` for `$i` from `N` down to 2, then `1 -> N` for `$N`.
    BackwardCircle,
    /// Every `i >= 2` sends `$i` to 1.
    Star,
    /// From `N` down to 2, `i` sends `$(N-i+1)` to 1.
    RobinHood,
    /// Seeded random transfers.
    Random,
}

impl PlanKind {
    /// Fixed order list for `account_count` Accounts, `None` for `Random`.
    pub fn orders(self, account_count: usize) -> Option<Vec<TransferOrder>> {
        let n = account_count as i64;
        let order = |src: i64, dst: i64, amount: i64| {
            Some(TransferOrder::new(
                ParticipantId::from_index(src as usize)?,
                ParticipantId::from_index(dst as usize)?,
                amount,
            ))
        };

        let orders: Vec<Option<TransferOrder>> = match self {
            PlanKind::None => Vec::new(),
            PlanKind::ForwardCircle => {
                let mut orders: Vec<_> = (1..n).map(|i| order(i, i + 1, i)).collect();
                if n > 1 {
                    orders.push(order(n, 1, 1));
                }
                orders
            }
            PlanKind::BackwardCircle => {
                let mut orders: Vec<_> = (2..=n).rev().map(|i| order(i, i - 1, i)).collect();
                if n > 1 {
                    orders.push(order(1, n, n));
                }
                orders
            }
            PlanKind::Star => (2..=n).map(|i| order(i, 1, i)).collect(),
            PlanKind::RobinHood => (2..=n).rev().map(|i| order(i, 1, n - i + 1)).collect(),
            PlanKind::Random => return None,
        };
        orders.into_iter().collect()
    }

    /// Command-line name.
    pub fn name(self) -> &'static str {
        match self {
            PlanKind::None => "none",
            PlanKind::ForwardCircle => "forward-circle",
            PlanKind::BackwardCircle => "backward-circle",
            PlanKind::Star => "star",
            PlanKind::RobinHood => "robin-hood",
            PlanKind::Random => "random",
        }
    }
}

/// Issues a fixed list of orders in sequence.
#[derive(Debug, Clone)]
pub struct ScriptedPlan {
    name: String,
    orders: Vec<TransferOrder>,
}

impl ScriptedPlan {
    /// Plan issuing `orders` in order.
    pub fn new(name: impl Into<String>, orders: Vec<TransferOrder>) -> Self {
        Self {
            name: name.into(),
            orders,
        }
    }

    /// Built-in shape for `account_count` Accounts, `None` for `Random`.
    pub fn from_kind(kind: PlanKind, account_count: usize) -> Option<Self> {
        Some(Self::new(kind.name(), kind.orders(account_count)?))
    }

    /// Orders the plan will issue.
    pub fn orders(&self) -> &[TransferOrder] {
        &self.orders
    }
}

#[async_trait(?Send)]
impl TransferPlan for ScriptedPlan {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, issuer: &mut TransferIssuer<'_>) -> Result<(), ProtocolError> {
        for order in &self.orders {
            issue(issuer, order.src, order.dst, order.amount).await?;
        }
        Ok(())
    }
}

/// `count` transfers between random distinct Accounts, amounts in `1..=max_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomPlan {
    count: usize,
    max_amount: Balance,
    seed: u64,
}

impl RandomPlan {
    /// Plan with a fixed seed.
    pub fn new(count: usize, max_amount: Balance, seed: u64) -> Self {
        Self {
            count,
            max_amount: max_amount.max(1),
            seed,
        }
    }

    /// Orders this plan issues for `account_count` Accounts.
    pub fn orders(&self, account_count: usize) -> Vec<TransferOrder> {
        if account_count < 2 {
            return Vec::new();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        (0..self.count)
            .filter_map(|_| {
                let src = rng.random_range(1..=account_count);
                // Draw among the other Accounts, then skip over `src`.
                let mut dst = rng.random_range(1..account_count);
                if dst >= src {
                    dst += 1;
                }
                let amount = rng.random_range(1..=self.max_amount);
                Some(TransferOrder::new(
                    ParticipantId::from_index(src)?,
                    ParticipantId::from_index(dst)?,
                    amount,
                ))
            })
            .collect()
    }
}

#[async_trait(?Send)]
impl TransferPlan for RandomPlan {
    fn name(&self) -> &str {
        "random"
    }

    async fn execute(&self, issuer: &mut TransferIssuer<'_>) -> Result<(), ProtocolError> {
        tracing::info!(seed = self.seed, count = self.count, "random transfers");
        for order in self.orders(issuer.account_count()) {
            issue(issuer, order.src, order.dst, order.amount).await?;
        }
        Ok(())
    }
}

async fn issue(
    issuer: &mut TransferIssuer<'_>,
    src: ParticipantId,
    dst: ParticipantId,
    amount: Balance,
) -> Result<(), ProtocolError> {
    match issuer.transfer(src, dst, amount).await? {
        TransferOutcome::Acknowledged => {}
        TransferOutcome::Rejected { kind } => {
            tracing::warn!(src = %src, dst = %dst, amount, reply = %kind, "transfer not acknowledged");
        }
    }
    Ok(())
}
