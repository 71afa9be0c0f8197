//! End-to-end runs of every participant inside one runtime.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use meshbank::{
    AllHistory, ConfigError, LedgerEvent, LocalRun, PlanKind, ProtocolError, RandomPlan,
    RecordingSink, RunConfig, RunError, ScriptedPlan, TransferIssuer, TransferPlan, exit,
    run_local,
};
use meshbank_core::{Balance, MAX_HISTORY_LEN, ParticipantId, Timestamp, TransferOrder};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("Failed to create runtime")
}

fn id(raw: i8) -> ParticipantId {
    ParticipantId::new(raw)
}

fn run(balances: &[Balance], plan: Rc<dyn TransferPlan>) -> (LocalRun, Rc<RecordingSink>) {
    let config = RunConfig::quiet(balances.to_vec());
    let sink = Rc::new(RecordingSink::new());
    let local = runtime()
        .block_on(run_local(&config, plan, sink.clone()))
        .expect("run succeeds");
    (local, sink)
}

fn scripted(orders: &[(i8, i8, Balance)]) -> Rc<dyn TransferPlan> {
    let orders = orders
        .iter()
        .map(|&(src, dst, amount)| TransferOrder::new(id(src), id(dst), amount))
        .collect();
    Rc::new(ScriptedPlan::new("scripted", orders))
}

fn kind(kind: PlanKind, n: usize) -> Rc<dyn TransferPlan> {
    Rc::new(ScriptedPlan::from_kind(kind, n).expect("fixed plan"))
}

/// Every history covers `0..=last` with no gap and the report total never moves.
fn assert_consistent(histories: &AllHistory, initial_total: Balance) {
    assert!(histories.is_complete());
    for history in histories.iter() {
        for (t, state) in history.entries().iter().enumerate() {
            assert_eq!(state.time, t as Timestamp, "gap in {}'s history", history.owner());
            assert!(state.pending_in >= 0);
        }
    }
    let report = histories.report();
    assert_eq!(report.conserved_total(), Some(initial_total), "{report}");
}

#[test]
fn test_scenario_no_transfers() {
    let (local, _) = run(&[100, 50], kind(PlanKind::None, 2));
    let histories = local.histories();
    assert_consistent(histories, 150);

    for (raw, balance) in [(1, 100), (2, 50)] {
        let history = histories.get(id(raw)).expect("history");
        assert_eq!(history.final_balance(), balance);
        assert!(
            history
                .entries()
                .iter()
                .all(|s| s.balance == balance && s.pending_in == 0)
        );
    }
    assert_eq!(local.coordinator.transfers_issued, 0);
}

#[test]
fn test_scenario_single_transfer_tracks_money_in_flight() {
    let (local, sink) = run(&[100, 50], scripted(&[(1, 2, 30)]));
    let histories = local.histories();
    assert_consistent(histories, 150);

    let sent_at = sink
        .events()
        .iter()
        .find_map(|e| match e {
            LedgerEvent::TransferOut { time, .. } => Some(*time),
            _ => None,
        })
        .expect("transfer out");
    let received_at = sink
        .events()
        .iter()
        .find_map(|e| match e {
            LedgerEvent::TransferIn { time, .. } => Some(*time),
            _ => None,
        })
        .expect("transfer in");
    assert!(sent_at < received_at);

    let source = histories.get(id(1)).expect("history 1");
    assert_eq!(source.state_at_or_last(sent_at - 1).balance, 100);
    assert_eq!(source.state_at_or_last(sent_at).balance, 70);
    assert_eq!(source.final_balance(), 70);

    let dest = histories.get(id(2)).expect("history 2");
    for t in 0..sent_at {
        assert_eq!(dest.state_at_or_last(t).pending_in, 0);
    }
    for t in sent_at..received_at {
        let state = dest.state_at_or_last(t);
        assert_eq!((state.balance, state.pending_in), (50, 30), "at {t}");
    }
    let state = dest.state_at_or_last(received_at);
    assert_eq!((state.balance, state.pending_in), (80, 0));
    assert_eq!(local.coordinator.transfers_issued, 1);
}

#[test]
fn test_scenario_overdraft_is_applied() {
    let (local, _) = run(&[10, 5], scripted(&[(1, 2, 25)]));
    let histories = local.histories();
    assert_consistent(histories, 15);
    assert_eq!(histories.report().final_balances(), vec![-15, 30]);
}

#[test]
fn test_plan_matrix_final_balances() {
    let cases: &[(PlanKind, &[Balance], &[Balance])] = &[
        (PlanKind::ForwardCircle, &[10, 20, 30], &[10, 19, 31]),
        (PlanKind::ForwardCircle, &[5, 10, 15, 20], &[5, 9, 14, 22]),
        (PlanKind::Star, &[10, 20, 30], &[15, 18, 27]),
        (PlanKind::RobinHood, &[10, 20, 30], &[13, 18, 29]),
        (PlanKind::BackwardCircle, &[10, 20, 30], &[9, 21, 30]),
        (
            PlanKind::ForwardCircle,
            &[10, 20, 30, 40, 50, 60, 70, 80, 90, 100],
            &[10, 19, 29, 39, 49, 59, 69, 79, 89, 108],
        ),
    ];

    for &(plan, initial, expected) in cases {
        let (local, _) = run(initial, kind(plan, initial.len()));
        let total: Balance = initial.iter().sum();
        assert_consistent(local.histories(), total);
        assert_eq!(
            local.histories().report().final_balances(),
            expected,
            "{} over {initial:?}",
            plan.name()
        );
    }
}

#[test]
fn test_event_lines() {
    let (_, sink) = run(&[10, 20, 30], kind(PlanKind::ForwardCircle, 3));
    let lines = sink.lines();

    for raw in 0..=3 {
        let all_started = format!("process {raw} received all STARTED messages");
        let all_done = format!("process {raw} received all DONE messages");
        assert!(lines.iter().any(|l| l.ends_with(&all_started)), "{all_started}");
        assert!(lines.iter().any(|l| l.ends_with(&all_done)), "{all_done}");
    }
    for (raw, initial, last) in [(1, 10, 10), (2, 20, 19), (3, 30, 31)] {
        let started = format!("has STARTED with balance ${initial}");
        let done = format!("process {raw} has DONE with balance ${last}");
        assert!(lines.iter().any(|l| l.contains(&format!("process {raw} ")) && l.ends_with(&started)));
        assert!(lines.iter().any(|l| l.ends_with(&done)), "{done}");
    }
    for (src, amount, dst) in [(1, 1, 2), (2, 2, 3), (3, 1, 1)] {
        let line = format!("process {src} transferred $ {amount} to process {dst}");
        assert!(lines.iter().any(|l| l.ends_with(&line)), "{line}");
    }
}

#[test]
fn test_event_times_are_causal() {
    let (_, sink) = run(&[10, 20, 30, 40], kind(PlanKind::Star, 4));
    let events = sink.events();

    // Each transfer's receive happens strictly after its send.
    for event in &events {
        if let LedgerEvent::TransferIn { time, id, src, .. } = event {
            let sent = events
                .iter()
                .find_map(|e| match e {
                    LedgerEvent::TransferOut {
                        time, id: from, dst, ..
                    } if from == src && dst == id => Some(*time),
                    _ => None,
                })
                .expect("matching send");
            assert!(sent < *time);
        }
    }
    // Nobody is DONE before STOP could have been issued, i.e. after all transfers.
    let last_transfer = events
        .iter()
        .filter_map(|e| match e {
            LedgerEvent::TransferIn { time, .. } => Some(*time),
            _ => None,
        })
        .max()
        .expect("transfers");
    for event in &events {
        if let LedgerEvent::Done { time, .. } = event {
            assert!(*time > last_transfer);
        }
    }
}

#[test]
fn test_single_account_run() {
    let (local, sink) = run(&[42], kind(PlanKind::ForwardCircle, 1));
    assert_consistent(local.histories(), 42);
    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.ends_with("process 1 received all STARTED messages")));
    assert!(lines.iter().any(|l| l.ends_with("process 1 received all DONE messages")));
}

#[test]
fn test_random_plan_conserves_money() {
    let plan: Rc<dyn TransferPlan> = Rc::new(RandomPlan::new(25, 7, 1234));
    let (local, _) = run(&[20, 20, 20, 20, 20], plan);
    assert_consistent(local.histories(), 100);
    assert_eq!(local.coordinator.transfers_issued, 25);
}

#[test]
fn test_no_message_left_after_shutdown() {
    let rt = runtime();
    let config = RunConfig::quiet(vec![10, 20, 30]);
    let sink = Rc::new(RecordingSink::new());
    rt.block_on(async {
        let plan = config.build_plan();
        let mut local = run_local(&config, plan, sink).await.expect("run succeeds");
        assert_eq!(local.coordinator.done_messages, 3);

        let transports = std::iter::once(&mut local.coordinator.transport)
            .chain(local.accounts.iter_mut().map(|a| &mut a.transport));
        for transport in transports {
            let leftover =
                tokio::time::timeout(Duration::from_millis(50), transport.receive_any()).await;
            assert!(leftover.is_err(), "{} has an unread message", transport.local_id());
        }
    });
}

#[test]
fn test_invalid_transfer_aborts_run() {
    let config = RunConfig::quiet(vec![10, 20]);
    let sink = Rc::new(RecordingSink::new());
    let result = runtime().block_on(run_local(&config, scripted(&[(1, 1, 5)]), sink));
    match result {
        Err(RunError::Protocol { participant, .. }) => {
            assert_eq!(participant, ParticipantId::COORDINATOR);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("self-transfer accepted"),
    }
}

#[test]
fn test_configuration_is_checked_first() {
    let config = RunConfig::quiet(vec![]);
    let sink = Rc::new(RecordingSink::new());
    let result = runtime().block_on(run_local(&config, kind(PlanKind::None, 0), sink));
    assert!(matches!(result, Err(RunError::Config(_))));
}

#[test]
fn test_largest_random_plan_fits_history() {
    let config = RunConfig::quiet(vec![10, 10]).with_plan(PlanKind::Random);
    let max = config.max_transfers();
    let config = config.with_random(max, 5, 1);
    let sink = Rc::new(RecordingSink::new());
    let local = runtime()
        .block_on(run_local(&config, config.build_plan(), sink))
        .expect("run succeeds");

    assert_eq!(local.coordinator.transfers_issued, max);
    assert_consistent(local.histories(), 20);
    for history in local.histories().iter() {
        assert!(history.len() <= MAX_HISTORY_LEN, "{} entries", history.len());
    }
}

#[test]
fn test_oversized_runs_are_rejected_before_start() {
    let sink = Rc::new(RecordingSink::new());
    let overflow = RunConfig::quiet(vec![i64::MAX, 1]);
    let result = runtime().block_on(run_local(&overflow, kind(PlanKind::None, 2), sink.clone()));
    assert!(matches!(
        result,
        Err(RunError::Config(ConfigError::BalanceOverflow))
    ));

    let busy = RunConfig::quiet(vec![10, 10])
        .with_plan(PlanKind::Random)
        .with_random(200, 5, 1);
    let result = runtime().block_on(run_local(&busy, busy.build_plan(), sink.clone()));
    match result {
        Err(RunError::Config(ConfigError::TooManyTransfers { count, max })) => {
            assert_eq!((count, max), (200, 83));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("oversized run accepted"),
    }
    assert!(sink.events().is_empty());
}

struct PanickingPlan;

#[async_trait(?Send)]
impl TransferPlan for PanickingPlan {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(&self, _issuer: &mut TransferIssuer<'_>) -> Result<(), ProtocolError> {
        panic!("plan exploded")
    }
}

#[test]
fn test_panicking_plan_is_reported_as_aborted_role() {
    let config = RunConfig::quiet(vec![10, 20]);
    let sink = Rc::new(RecordingSink::new());
    let result = runtime().block_on(run_local(&config, Rc::new(PanickingPlan), sink));
    match result {
        Err(error @ RunError::RoleAborted { .. }) => {
            assert_eq!(error.to_string(), "role aborted: plan exploded");
            assert_eq!(error.exit_code(), exit::PROTOCOL);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("panicking plan completed"),
    }
}
