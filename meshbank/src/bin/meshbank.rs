//! `meshbank -p N B1 .. BN`: run one banking session and print its history.

use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use meshbank::{
    AllHistory, Cli, EventLog, EventSink, PipesLog, RunConfig, RunError, exit, init_tracing,
    run_forked, run_local_blocking,
};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(exit::USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid arguments");
            eprintln!("meshbank: {e}");
            return ExitCode::from(exit::USAGE);
        }
    };

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(config: &RunConfig) -> Result<u8, RunError> {
    let sink: Rc<dyn EventSink> = Rc::new(EventLog::open(config.events_log.as_deref())?);
    let pipes = config
        .pipes_log
        .as_deref()
        .map(PipesLog::open)
        .transpose()?;
    let plan = config.build_plan();
    tracing::info!(
        accounts = config.account_count(),
        plan = plan.name(),
        local = config.local,
        "starting run"
    );

    let (histories, code) = if config.local {
        (run_local_blocking(config, plan, sink)?, exit::SUCCESS)
    } else {
        let run = run_forked(config, &*plan, sink, pipes.as_ref())?;
        for child in run.children.iter().filter(|child| child.code != exit::SUCCESS) {
            tracing::error!(
                participant = %child.participant,
                pid = child.pid,
                code = child.code,
                "account exited with failure"
            );
        }
        let code = run.exit_code();
        (run.histories, code)
    };

    report(config, &histories)?;
    Ok(code)
}

fn report(config: &RunConfig, histories: &AllHistory) -> Result<(), RunError> {
    let report = histories.report();
    print!("{report}");

    match report.conserved_total() {
        Some(total) if total == config.initial_total() => {}
        Some(total) => tracing::warn!(
            total,
            expected = config.initial_total(),
            "total differs from the sum of initial balances"
        ),
        None => tracing::warn!("total money is not constant over time"),
    }

    if let Some(path) = &config.json_report {
        let json = histories.to_json()?;
        std::fs::write(path, json).map_err(|source| RunError::Output {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "wrote JSON report");
    }
    Ok(())
}
