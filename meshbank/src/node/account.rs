//! Account role.
//!
//! ```text
//! tick, multicast STARTED
//!   loop until all STARTED, all DONE and own STOP handled:
//!     STARTED  -> count
//!     TRANSFER -> src == self: tick, debit, forward to dst
//!                 dst == self: credit at observe time, tick, ACK Coordinator
//!     STOP     -> tick, multicast DONE
//!     DONE     -> count
//! fill history to now, tick, send BALANCE_HISTORY to Coordinator
//! ```

use std::rc::Rc;

use meshbank_core::{
    Balance, BalanceHistory, LamportClock, ParticipantId, Timestamp, TransferOrder,
};
use meshbank_transport::{Message, MessageBody, Transport};

use crate::error::{LedgerError, ProtocolError};
use crate::events::{EventSink, LedgerEvent};
use crate::ledger::HistoryLedger;
use crate::node::Phase;

/// What an Account leaves behind once its loop is over.
pub struct AccountReport {
    /// The history sent to the Coordinator.
    pub history: BalanceHistory,
    /// The Account's transport, still open.
    pub transport: Transport,
}

/// One Account's protocol state.
pub struct Account {
    id: ParticipantId,
    transport: Transport,
    clock: LamportClock,
    ledger: HistoryLedger,
    sink: Rc<dyn EventSink>,
    /// Other Accounts, i.e. peers minus the Coordinator.
    other_accounts: usize,
    started: usize,
    done: usize,
    stopped: bool,
    phase: Phase,
}

impl Account {
    /// Prepare the role over `transport` with `initial` balance.
    pub fn new(transport: Transport, initial: Balance, sink: Rc<dyn EventSink>) -> Self {
        let id = transport.local_id();
        let other_accounts = transport.participant_count().saturating_sub(2);
        Self {
            id,
            transport,
            clock: LamportClock::new(),
            ledger: HistoryLedger::new(id, initial),
            sink,
            other_accounts,
            started: 0,
            done: 0,
            stopped: false,
            phase: Phase::AwaitPeers,
        }
    }

    /// Run the protocol to completion.
    ///
    /// # Errors
    ///
    /// Any transport failure, unexpected message or ledger overflow is fatal.
    pub async fn run(mut self) -> Result<AccountReport, ProtocolError> {
        self.announce_start().await?;

        while !self.finished() {
            let (from, msg) = self.transport.receive_any().await?;
            let now = self.clock.observe(msg.logical_time);
            let kind = msg.kind();
            tracing::debug!(participant = %self.id, from = %from, %kind, time = now, "account dispatch");

            match msg.body {
                MessageBody::Started(_) if !from.is_coordinator() => {
                    self.started += 1;
                    if self.started == self.other_accounts {
                        self.emit(LedgerEvent::ReceivedAllStarted {
                            time: now,
                            id: self.id,
                        });
                    }
                }
                MessageBody::Transfer(order) if order.src == self.id => {
                    self.transfer_out(order).await?;
                }
                MessageBody::Transfer(order) if order.dst == self.id => {
                    self.transfer_in(order, msg.logical_time, now).await?;
                }
                MessageBody::Transfer(order) => {
                    return Err(ProtocolError::MisroutedTransfer {
                        participant: self.id,
                        order,
                    });
                }
                MessageBody::Stop if from.is_coordinator() && !self.stopped => {
                    self.stop().await?;
                }
                MessageBody::Done(_) if !from.is_coordinator() => {
                    self.done += 1;
                    if self.done == self.other_accounts {
                        self.emit(LedgerEvent::ReceivedAllDone {
                            time: now,
                            id: self.id,
                        });
                    }
                }
                MessageBody::Started(_)
                | MessageBody::Stop
                | MessageBody::Done(_)
                | MessageBody::Ack
                | MessageBody::BalanceHistory(_) => {
                    return Err(ProtocolError::UnexpectedMessage {
                        participant: self.id,
                        from,
                        kind,
                    });
                }
            }
            self.advance_phase();
        }

        self.publish_history().await
    }

    fn finished(&self) -> bool {
        self.started == self.other_accounts && self.done == self.other_accounts && self.stopped
    }

    fn advance_phase(&mut self) {
        let next = if self.stopped {
            Phase::AwaitShutdown
        } else if self.started == self.other_accounts {
            Phase::Active
        } else {
            Phase::AwaitPeers
        };
        if next != self.phase {
            tracing::debug!(participant = %self.id, from = ?self.phase, to = ?next, "phase change");
            self.phase = next;
        }
    }

    fn emit(&self, event: LedgerEvent) {
        self.sink.record(&event);
    }

    fn ledger_error(&self, source: LedgerError) -> ProtocolError {
        ProtocolError::Ledger {
            participant: self.id,
            source,
        }
    }

    async fn announce_start(&mut self) -> Result<(), ProtocolError> {
        let time = self.clock.tick();
        let event = LedgerEvent::Started {
            time,
            id: self.id,
            pid: std::process::id(),
            parent_pid: std::os::unix::process::parent_id(),
            balance: self.ledger.balance(),
        };
        self.transport
            .send_multicast(&Message::started(time, event.to_string()))
            .await?;
        self.emit(event);

        if self.other_accounts == 0 {
            self.emit(LedgerEvent::ReceivedAllStarted { time, id: self.id });
        }
        self.advance_phase();
        Ok(())
    }

    async fn transfer_out(&mut self, order: TransferOrder) -> Result<(), ProtocolError> {
        let time = self.clock.tick();
        self.ledger
            .record_outgoing(time, order.amount)
            .map_err(|e| self.ledger_error(e))?;
        self.transport
            .send(order.dst, &Message::transfer(time, order))
            .await?;
        self.emit(LedgerEvent::TransferOut {
            time,
            id: self.id,
            amount: order.amount,
            dst: order.dst,
        });
        Ok(())
    }

    async fn transfer_in(
        &mut self,
        order: TransferOrder,
        sent_at: Timestamp,
        received_at: Timestamp,
    ) -> Result<(), ProtocolError> {
        self.ledger
            .record_incoming(sent_at, received_at, order.amount)
            .map_err(|e| self.ledger_error(e))?;

        let ack_time = self.clock.tick();
        self.transport
            .send(ParticipantId::COORDINATOR, &Message::ack(ack_time))
            .await?;
        self.emit(LedgerEvent::TransferIn {
            time: received_at,
            id: self.id,
            amount: order.amount,
            src: order.src,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProtocolError> {
        let time = self.clock.tick();
        let event = LedgerEvent::Done {
            time,
            id: self.id,
            balance: self.ledger.balance(),
        };
        self.transport
            .send_multicast(&Message::done(time, event.to_string()))
            .await?;
        self.emit(event);
        self.stopped = true;

        if self.other_accounts == 0 {
            self.emit(LedgerEvent::ReceivedAllDone { time, id: self.id });
        }
        Ok(())
    }

    async fn publish_history(mut self) -> Result<AccountReport, ProtocolError> {
        let now = self.clock.now();
        self.ledger
            .advance_to(now)
            .map_err(|e| self.ledger_error(e))?;
        self.phase = Phase::Terminated;

        let time = self.clock.tick();
        let id = self.id;
        let history = self
            .ledger
            .freeze()
            .map_err(|source| ProtocolError::Ledger {
                participant: id,
                source,
            })?;
        self.transport
            .send(
                ParticipantId::COORDINATOR,
                &Message::balance_history(time, history.clone()),
            )
            .await?;
        tracing::info!(
            participant = %id,
            balance = history.final_balance(),
            entries = history.len(),
            "account finished"
        );

        Ok(AccountReport {
            history,
            transport: self.transport,
        })
    }
}
