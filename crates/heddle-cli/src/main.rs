//! heddle CLI - in-memory の orchestrator 上で counter workflow を動かすデモ
//!
//! 1. WorkerConfig を読む（ファイルがなければ default）
//! 2. Migrator で domain / workflow type を登録（2 回目以降は skip）
//! 3. DecisionWorker を起動し、counter workflow に signal を送る
//! 4. history が大きくなると managed continuations で continue-as-new される

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use heddle_core::app::{DecisionWorker, Fsm, FsmBuilder, Migrator};
use heddle_core::decider::{
    compose, complete, default_decider, managed_continuations, on_signal_received, update_state,
};
use heddle_core::domain::{
    ContinuationConfig, DomainRegistration, WorkerConfig, WorkflowId, WorkflowType,
    WorkflowTypeRegistration,
};
use heddle_core::impls::{
    InMemoryOrchestrator, InMemoryRegistrationClient, InMemorySnapshotStore, dispatcher_from_config,
};
use heddle_core::ports::SnapshotStore;

const WORKFLOW_NAME: &str = "counter";
const WORKFLOW_VERSION: &str = "1";

#[derive(Parser, Debug)]
#[command(name = "heddle")]
#[command(author, version, about = "Run a counter workflow against the in-memory orchestrator", long_about = None)]
struct Cli {
    /// Worker config (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of "increment" signals to send.
    #[arg(short, long, default_value = "50")]
    signals: u32,

    /// Override continuations.history_size.
    #[arg(long)]
    history_size: Option<i64>,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Default)]
struct Counter {
    count: u32,
}

#[derive(Debug, Serialize)]
struct Report {
    workflow_id: String,
    count: u32,
    runs: usize,
    final_run_events: usize,
}

fn counter_fsm(continuations: &ContinuationConfig) -> Result<Fsm<Counter>> {
    let counting = compose(vec![
        on_signal_received(
            "increment",
            vec![update_state(|_, _, c: &mut Counter| c.count += 1)],
        ),
        on_signal_received("stop", vec![complete()]),
        managed_continuations(continuations),
        default_decider(),
    ]);
    FsmBuilder::new()
        .name(WORKFLOW_NAME)
        .state("counting", counting)
        .initial_state("counting")
        .build()
        .context("build counter fsm")
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::from_path(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(history_size) = cli.history_size {
        config.continuations.history_size = history_size;
    }
    config.validate()?;
    Ok(config)
}

async fn wait_for<F>(what: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check()? {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::info!(?config, "starting");

    let registry = InMemoryRegistrationClient::new();
    let migration = Migrator::new()
        .domain(DomainRegistration {
            name: config.domain.clone(),
            description: Some("heddle demo".to_string()),
            retention_days: 1,
        })
        .workflow_type(WorkflowTypeRegistration {
            domain: config.domain.clone(),
            name: WORKFLOW_NAME.to_string(),
            version: WORKFLOW_VERSION.to_string(),
            description: None,
            default_task_list: Some(config.task_list.clone()),
        })
        .migrate(&registry)
        .await?;
    tracing::info!(applied = migration.applied, skipped = migration.skipped, "registered");

    let orchestrator =
        Arc::new(InMemoryOrchestrator::default().with_poll_timeout(config.poll_timeout()));
    let snapshots = InMemorySnapshotStore::<Counter>::new();
    let worker = DecisionWorker::new(
        config.task_list.clone(),
        config.identity.clone(),
        Arc::new(counter_fsm(&config.continuations)?),
        orchestrator.clone(),
        Arc::new(snapshots.clone()),
        dispatcher_from_config(&config.dispatcher),
    )
    .spawn();

    let workflow_id = WorkflowId::new("counter-demo");
    let execution = orchestrator.start_workflow(
        WorkflowType::new(WORKFLOW_NAME, WORKFLOW_VERSION),
        workflow_id.clone(),
        None,
    )?;
    tracing::info!(%execution, signals = cli.signals, "workflow started");

    for _ in 0..cli.signals {
        orchestrator.signal_workflow(&workflow_id, "increment", None)?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut count = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while count < cli.signals {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {} increments (saw {count})", cli.signals);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        count = snapshots
            .load(&workflow_id)
            .await?
            .map(|s| s.data.count)
            .unwrap_or(0);
    }

    let runs = orchestrator.run_ids(&workflow_id)?.len();
    orchestrator.signal_workflow(&workflow_id, "stop", None)?;
    wait_for("workflow to complete", Duration::from_secs(10), || {
        Ok(!orchestrator.is_open(&workflow_id)?)
    })
    .await?;
    let final_run_events = orchestrator.history(&workflow_id)?.len();
    worker.shutdown_and_join().await;

    let report = Report {
        workflow_id: workflow_id.to_string(),
        count,
        runs,
        final_run_events,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: count={} runs={} final run events={}",
            report.workflow_id, report.count, report.runs, report.final_run_events
        );
    }
    Ok(())
}
