//! Coordinator role and the transfer issuance handle.
//!
//! The Coordinator waits for every Account's STARTED, runs the transfer plan,
//! multicasts STOP and then collects one BALANCE_HISTORY per Account. Plain
//! DONE messages are counted for diagnostics only.

use std::rc::Rc;

use meshbank_core::{Balance, LamportClock, ParticipantId, TransferOrder};
use meshbank_transport::{Message, MessageBody, MessageKind, Transport};

use crate::error::ProtocolError;
use crate::events::{EventSink, LedgerEvent};
use crate::history::AllHistory;
use crate::node::Phase;
use crate::plan::TransferPlan;

/// Result of one issued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Destination replied ACK.
    Acknowledged,
    /// Destination replied with something else; the transfer is unconfirmed.
    Rejected {
        /// Kind received instead of ACK.
        kind: MessageKind,
    },
}

/// Handle a [`TransferPlan`] uses to issue transfers through the Coordinator.
pub struct TransferIssuer<'a> {
    transport: &'a mut Transport,
    clock: &'a mut LamportClock,
    sink: &'a dyn EventSink,
    account_count: usize,
    issued: usize,
}

impl<'a> TransferIssuer<'a> {
    fn new(
        transport: &'a mut Transport,
        clock: &'a mut LamportClock,
        sink: &'a dyn EventSink,
    ) -> Self {
        let account_count = transport.participant_count().saturating_sub(1);
        Self {
            transport,
            clock,
            sink,
            account_count,
            issued: 0,
        }
    }

    /// Number of Accounts in the run.
    pub fn account_count(&self) -> usize {
        self.account_count
    }

    /// Account ids, ascending.
    pub fn accounts(&self) -> impl Iterator<Item = ParticipantId> {
        ParticipantId::accounts(self.account_count)
    }

    /// Transfers issued so far.
    pub fn issued(&self) -> usize {
        self.issued
    }

    fn validate(&self, order: TransferOrder) -> Result<(), ProtocolError> {
        let is_account =
            |id: ParticipantId| !id.is_coordinator() && id.index() <= self.account_count;
        let reason = if !is_account(order.src) {
            "source is not an account"
        } else if !is_account(order.dst) {
            "destination is not an account"
        } else if order.src == order.dst {
            "source and destination are the same account"
        } else if order.amount < 0 {
            "negative amount"
        } else {
            return Ok(());
        };
        Err(ProtocolError::InvalidTransfer { order, reason })
    }

    /// Move `amount` from `src` to `dst` and wait for `dst` to acknowledge.
    ///
    /// Sends TRANSFER to `src`, then blocks on the next message from `dst`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidTransfer`] for ids outside the run, `src == dst`
    ///   or a negative amount; nothing is sent
    /// - [`ProtocolError::Transport`] when a channel fails
    pub async fn transfer(
        &mut self,
        src: ParticipantId,
        dst: ParticipantId,
        amount: Balance,
    ) -> Result<TransferOutcome, ProtocolError> {
        let order = TransferOrder::new(src, dst, amount);
        self.validate(order)?;

        let time = self.clock.tick();
        self.transport
            .send(src, &Message::transfer(time, order))
            .await?;
        self.issued += 1;

        let reply = self.transport.receive(dst).await?;
        let now = self.clock.observe(reply.logical_time);
        match reply.kind() {
            MessageKind::Ack => {
                tracing::debug!(src = %src, dst = %dst, amount, time = now, "transfer acknowledged");
                Ok(TransferOutcome::Acknowledged)
            }
            kind => {
                self.sink.record(&LedgerEvent::TransferRejected {
                    time: now,
                    id: self.transport.local_id(),
                    src,
                    dst,
                    reply: kind,
                });
                Ok(TransferOutcome::Rejected { kind })
            }
        }
    }
}

/// What the Coordinator leaves behind once its loop is over.
pub struct CoordinatorReport {
    /// Every Account's history.
    pub histories: AllHistory,
    /// Transfers the plan issued.
    pub transfers_issued: usize,
    /// DONE messages seen.
    pub done_messages: usize,
    /// The Coordinator's transport, still open.
    pub transport: Transport,
}

/// The Coordinator's protocol state.
pub struct Coordinator {
    id: ParticipantId,
    transport: Transport,
    clock: LamportClock,
    sink: Rc<dyn EventSink>,
    account_count: usize,
    started: usize,
    done_messages: usize,
    transfers_issued: usize,
    histories: AllHistory,
    phase: Phase,
}

impl Coordinator {
    /// Prepare the role over `transport`.
    pub fn new(transport: Transport, sink: Rc<dyn EventSink>) -> Self {
        let account_count = transport.participant_count().saturating_sub(1);
        Self {
            id: transport.local_id(),
            transport,
            clock: LamportClock::new(),
            sink,
            account_count,
            started: 0,
            done_messages: 0,
            transfers_issued: 0,
            histories: AllHistory::new(account_count),
            phase: Phase::AwaitPeers,
        }
    }

    /// Run the protocol to completion, invoking `plan` once every Account is up.
    ///
    /// # Errors
    ///
    /// Any transport failure, unexpected message, bad history or plan error
    /// is fatal.
    pub async fn run(mut self, plan: &dyn TransferPlan) -> Result<CoordinatorReport, ProtocolError> {
        while self.started < self.account_count || !self.histories.is_complete() {
            let (from, msg) = self.transport.receive_any().await?;
            let now = self.clock.observe(msg.logical_time);
            let kind = msg.kind();
            tracing::debug!(participant = %self.id, from = %from, %kind, time = now, "coordinator dispatch");

            match msg.body {
                MessageBody::Started(_) if self.phase == Phase::AwaitPeers => {
                    self.started += 1;
                    if self.started == self.account_count {
                        self.emit(LedgerEvent::ReceivedAllStarted {
                            time: now,
                            id: self.id,
                        });
                        self.set_phase(Phase::Active);
                        self.run_plan(plan).await?;

                        let time = self.clock.tick();
                        self.transport.send_multicast(&Message::stop(time)).await?;
                        self.set_phase(Phase::AwaitShutdown);
                    }
                }
                MessageBody::Done(_) => {
                    self.done_messages += 1;
                }
                MessageBody::BalanceHistory(history) if self.phase == Phase::AwaitShutdown => {
                    self.histories.insert(from, history)?;
                    if self.histories.is_complete() {
                        self.emit(LedgerEvent::ReceivedAllDone {
                            time: now,
                            id: self.id,
                        });
                    }
                }
                MessageBody::Started(_)
                | MessageBody::BalanceHistory(_)
                | MessageBody::Ack
                | MessageBody::Stop
                | MessageBody::Transfer(_) => {
                    return Err(ProtocolError::UnexpectedMessage {
                        participant: self.id,
                        from,
                        kind,
                    });
                }
            }
        }

        self.set_phase(Phase::Terminated);
        tracing::info!(
            participant = %self.id,
            accounts = self.account_count,
            transfers = self.transfers_issued,
            "coordinator collected every history"
        );
        Ok(CoordinatorReport {
            histories: self.histories,
            transfers_issued: self.transfers_issued,
            done_messages: self.done_messages,
            transport: self.transport,
        })
    }

    async fn run_plan(&mut self, plan: &dyn TransferPlan) -> Result<(), ProtocolError> {
        tracing::info!(plan = plan.name(), accounts = self.account_count, "running transfer plan");
        let mut issuer = TransferIssuer::new(&mut self.transport, &mut self.clock, &*self.sink);
        plan.execute(&mut issuer).await?;
        self.transfers_issued = issuer.issued();
        Ok(())
    }

    fn set_phase(&mut self, next: Phase) {
        if next != self.phase {
            tracing::debug!(participant = %self.id, from = ?self.phase, to = ?next, "phase change");
            self.phase = next;
        }
    }

    fn emit(&self, event: LedgerEvent) {
        self.sink.record(&event);
    }
}
