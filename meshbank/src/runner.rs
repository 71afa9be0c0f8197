//! Process bootstrap.
//!
//! ```text
//! parent: build fabric ─┬─ fork Account 1 ── keep table 1 ── runtime ── Account::run ── _exit
//!                       ├─ fork Account 2 ── ...
//!                       └─ keep table 0 ── runtime ── Coordinator::run ── waitpid all
//! ```
//!
//! No tokio runtime exists before the last `fork`: each process builds its own
//! current-thread runtime after it has released the descriptors it does not
//! own. [`run_local`] runs the same roles as tasks of one runtime instead.

use std::any::Any;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use meshbank_core::{Balance, ParticipantId};
use meshbank_transport::{ChannelFabric, ChannelTable, FabricError, Transport};
use tokio::task::{JoinError, JoinSet, LocalSet};

use crate::config::RunConfig;
use crate::error::{ProtocolError, RunError, exit};
use crate::events::EventSink;
use crate::history::AllHistory;
use crate::logging::PipesLog;
use crate::node::{Account, AccountReport, Coordinator, CoordinatorReport};
use crate::plan::TransferPlan;

/// Exit status of one forked Account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildStatus {
    /// Account the child ran.
    pub participant: ParticipantId,
    /// OS process id.
    pub pid: libc::pid_t,
    /// Exit status, or `128 + signal` when killed.
    pub code: u8,
}

/// Outcome of [`run_forked`].
#[derive(Debug)]
pub struct ForkedRun {
    /// Histories collected by the Coordinator.
    pub histories: AllHistory,
    /// How every Account process ended.
    pub children: Vec<ChildStatus>,
}

impl ForkedRun {
    /// Worst exit status across every Account process.
    pub fn exit_code(&self) -> u8 {
        self.children
            .iter()
            .map(|child| child.code)
            .max()
            .unwrap_or(exit::SUCCESS)
    }
}

/// Outcome of [`run_local`]. Every transport is still open.
pub struct LocalRun {
    /// Coordinator's view, including its transport.
    pub coordinator: CoordinatorReport,
    /// Every Account's history and transport, ascending id.
    pub accounts: Vec<AccountReport>,
}

impl LocalRun {
    /// Histories collected by the Coordinator.
    pub fn histories(&self) -> &AllHistory {
        &self.coordinator.histories
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, RunError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(RunError::Runtime)
}

/// Run every participant in its own process.
///
/// The calling process becomes the Coordinator. Must be called from a
/// single-threaded process with no tokio runtime alive.
///
/// # Errors
///
/// - [`RunError::Config`] / [`RunError::Fabric`]: nothing was spawned
/// - [`RunError::Fork`]: children already spawned were terminated and reaped
/// - [`RunError::Protocol`]: the Coordinator failed; children were terminated
/// - [`RunError::RoleAborted`]: the Coordinator panicked; children were terminated
pub fn run_forked(
    config: &RunConfig,
    plan: &dyn TransferPlan,
    sink: Rc<dyn EventSink>,
    pipes: Option<&PipesLog>,
) -> Result<ForkedRun, RunError> {
    config.validate()?;
    let fabric = ChannelFabric::build(config.participant_count())?;
    if let Some(pipes) = pipes {
        pipes.record_fabric(&fabric.descriptors());
    }
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let mut children: Vec<(ParticipantId, libc::pid_t)> = Vec::new();

    for (participant, &balance) in ParticipantId::accounts(config.account_count()).zip(&config.balances) {
        // Safety: the process is single-threaded here; no runtime exists yet.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => {
                let source = io::Error::last_os_error();
                tracing::error!(participant = %participant, error = %source, "fork failed");
                terminate(&children);
                return Err(RunError::Fork {
                    participant,
                    source,
                });
            }
            0 => {
                let code = catch_unwind(AssertUnwindSafe(move || {
                    account_process(fabric, participant, balance, sink, pipes)
                }))
                .unwrap_or(exit::PROTOCOL);
                let _ = io::stdout().flush();
                // Safety: leaves the child without running the parent's cleanup.
                unsafe { libc::_exit(i32::from(code)) }
            }
            child => {
                tracing::debug!(participant = %participant, pid = child, "forked account");
                children.push((participant, child));
            }
        }
    }

    let table = match fabric.into_table(ParticipantId::COORDINATOR) {
        Ok(table) => table,
        Err(e) => {
            terminate(&children);
            return Err(e.into());
        }
    };
    if let Some(pipes) = pipes {
        pipes.record_retained(&table);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| coordinator_process(table, plan, sink)))
        .unwrap_or_else(|payload| {
            Err(RunError::RoleAborted {
                reason: panic_message(&*payload),
            })
        });
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "coordinator failed, terminating accounts");
        terminate(&children);
    }
    let statuses = reap(&children);
    if let Some(pipes) = pipes {
        pipes.record_closed(ParticipantId::COORDINATOR, config.account_count());
    }

    let report = outcome?;
    Ok(ForkedRun {
        histories: report.histories,
        children: statuses,
    })
}

/// Body of a forked Account process. Returns its exit status.
fn account_process(
    fabric: ChannelFabric,
    participant: ParticipantId,
    balance: Balance,
    sink: Rc<dyn EventSink>,
    pipes: Option<&PipesLog>,
) -> u8 {
    let table = match fabric.into_table(participant) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(participant = %participant, error = %e, "no channel table");
            return exit::SETUP;
        }
    };
    if let Some(pipes) = pipes {
        pipes.record_retained(&table);
    }
    let peers = table.participant_count() - 1;

    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(participant = %participant, error = %e, "runtime");
            return exit::SETUP;
        }
    };
    let result = rt.block_on(async move {
        let transport = Transport::new(table)?;
        Account::new(transport, balance, sink).run().await
    });

    if let Some(pipes) = pipes {
        pipes.record_closed(participant, peers);
    }
    match result {
        Ok(_) => exit::SUCCESS,
        Err(e) => {
            tracing::error!(participant = %participant, error = %e, "account failed");
            e.exit_code()
        }
    }
}

fn coordinator_process(
    table: ChannelTable,
    plan: &dyn TransferPlan,
    sink: Rc<dyn EventSink>,
) -> Result<CoordinatorReport, RunError> {
    let rt = runtime()?;
    rt.block_on(async move {
        let transport = Transport::new(table).map_err(ProtocolError::from)?;
        Coordinator::new(transport, sink).run(plan).await
    })
    .map_err(|source| RunError::Protocol {
        participant: ParticipantId::COORDINATOR,
        source,
    })
}

/// SIGTERM every child, then reap them.
fn terminate(children: &[(ParticipantId, libc::pid_t)]) {
    for &(participant, pid) in children {
        tracing::warn!(participant = %participant, pid, "terminating account");
        // Safety: pid is a child of this process that has not been reaped.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
    let _ = reap(children);
}

fn reap(children: &[(ParticipantId, libc::pid_t)]) -> Vec<ChildStatus> {
    children
        .iter()
        .map(|&(participant, pid)| {
            let mut status: libc::c_int = 0;
            let code = loop {
                // Safety: status is a valid out-pointer; pid is our child.
                let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
                if rc == -1 {
                    let e = io::Error::last_os_error();
                    if e.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    tracing::warn!(participant = %participant, pid, error = %e, "waitpid failed");
                    break exit::SETUP;
                }
                if libc::WIFEXITED(status) {
                    break u8::try_from(libc::WEXITSTATUS(status)).unwrap_or(u8::MAX);
                }
                if libc::WIFSIGNALED(status) {
                    break u8::try_from(128 + libc::WTERMSIG(status)).unwrap_or(u8::MAX);
                }
            };
            tracing::debug!(participant = %participant, pid, code, "account exited");
            ChildStatus {
                participant,
                pid,
                code,
            }
        })
        .collect()
}

fn role_failed(participant: ParticipantId, source: ProtocolError) -> RunError {
    RunError::Protocol {
        participant,
        source,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Panic message of a role task, or why it ended without one.
fn abort_reason(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(&*error.into_panic())
    } else {
        "cancelled".to_string()
    }
}

enum Role {
    Account(AccountReport),
    Coordinator(CoordinatorReport),
}

/// Run every participant as a task of the current runtime.
///
/// Roles run on a [`LocalSet`]; the first role error aborts the others.
///
/// # Errors
///
/// - [`RunError::Protocol`]: the first role failure, tagged with its participant
/// - [`RunError::RoleAborted`]: a role task panicked, e.g. inside the plan
pub async fn run_local(
    config: &RunConfig,
    plan: Rc<dyn TransferPlan>,
    sink: Rc<dyn EventSink>,
) -> Result<LocalRun, RunError> {
    config.validate()?;
    let mut tables = ChannelFabric::build(config.participant_count())?
        .into_tables()
        .into_iter();
    let coordinator_table = tables
        .next()
        .ok_or(FabricError::UnknownParticipant(ParticipantId::COORDINATOR))?;

    let mut roles: JoinSet<(ParticipantId, Result<Role, ProtocolError>)> = JoinSet::new();
    let local = LocalSet::new();
    local
        .run_until(async move {
            for (table, &balance) in tables.zip(&config.balances) {
                let participant = table.owner();
                let transport = Transport::new(table)
                    .map_err(|e| role_failed(participant, e.into()))?;
                let account = Account::new(transport, balance, sink.clone());
                roles.spawn_local(async move {
                    (participant, account.run().await.map(Role::Account))
                });
            }

            let transport = Transport::new(coordinator_table)
                .map_err(|e| role_failed(ParticipantId::COORDINATOR, e.into()))?;
            let coordinator = Coordinator::new(transport, sink);
            roles.spawn_local(async move {
                let result = coordinator.run(&*plan).await.map(Role::Coordinator);
                (ParticipantId::COORDINATOR, result)
            });

            let mut coordinator = None;
            let mut accounts = Vec::new();
            while let Some(joined) = roles.join_next().await {
                let (participant, result) = match joined {
                    Ok(joined) => joined,
                    Err(e) => {
                        roles.abort_all();
                        let reason = abort_reason(e);
                        tracing::error!(%reason, "role task aborted");
                        return Err(RunError::RoleAborted { reason });
                    }
                };
                match result {
                    Ok(Role::Coordinator(report)) => coordinator = Some(report),
                    Ok(Role::Account(report)) => accounts.push(report),
                    Err(source) => {
                        tracing::error!(participant = %participant, error = %source, "role failed");
                        roles.abort_all();
                        return Err(role_failed(participant, source));
                    }
                }
            }

            accounts.sort_by_key(|report| report.history.owner());
            let coordinator = coordinator
                .ok_or(FabricError::UnknownParticipant(ParticipantId::COORDINATOR))?;
            Ok(LocalRun {
                coordinator,
                accounts,
            })
        })
        .await
}

/// Build a runtime and drive [`run_local`] on it.
///
/// # Errors
///
/// Same as [`run_local`], plus [`RunError::Runtime`].
pub fn run_local_blocking(
    config: &RunConfig,
    plan: Rc<dyn TransferPlan>,
    sink: Rc<dyn EventSink>,
) -> Result<AllHistory, RunError> {
    let rt = runtime()?;
    let run = rt.block_on(run_local(config, plan, sink))?;
    Ok(run.coordinator.histories)
}
