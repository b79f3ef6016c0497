//! `chorus`: run a persona chat room against a local model server.
//!
//! The transcript goes to stdout as `[name]: text`; logs go to stderr.
//! While it runs, each stdin line of the form `command=value` is applied as a
//! world event before the next turn, e.g. `change_weather=storm`.

use std::path::PathBuf;

use anyhow::Context;
use chorus_core::config::ChorusConfig;
use chorus_core::event::WorldEvent;
use chorus_core::persistence::WorldStore;
use chorus_world::simulation::build_llm_client;
use chorus_world::{JsonReportSink, Simulation};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chorus", version, about = "Scripted chat personas that talk to each other")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, env = "CHORUS_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many turns (default: run until Ctrl-C).
    #[arg(short, long)]
    turns: Option<u64>,

    /// SQLite database path (overrides `persistence.path`).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Do not write anything to the database.
    #[arg(long)]
    no_persist: bool,

    /// RNG seed for speaker selection (overrides `general.seed`).
    #[arg(long)]
    seed: Option<u64>,

    /// World event applied after the opening line, as `command=value`
    /// (change_weather, set_time, announcement, emotion). Repeatable.
    #[arg(long = "event", value_name = "COMMAND=VALUE")]
    events: Vec<WorldEvent>,

    /// Do not read world events from stdin.
    #[arg(long)]
    no_stdin: bool,
}

/// Forward each stdin line as a world event until stdin closes.
fn spawn_stdin_events(tx: mpsc::UnboundedSender<WorldEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<WorldEvent>() {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(input = line, error = %e, "Ignoring world command"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Could not read stdin");
                    break;
                }
            }
        }
    });
}

fn init_tracing(config: &ChorusConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.general.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ChorusConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ChorusConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.general.seed = Some(seed);
    }
    if let Some(db) = &cli.db {
        config.persistence.path = db.display().to_string();
    }
    if cli.no_persist {
        config.persistence.enabled = false;
    }

    init_tracing(&config);

    let client = build_llm_client(&config.llm).context("building model client")?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        "Model client ready"
    );

    let mut simulation = Simulation::new(&config, client).context("setting up the world")?;
    if config.persistence.enabled {
        let store = WorldStore::open(&config.persistence.path, &config.persistence)
            .with_context(|| format!("opening database {}", config.persistence.path))?;
        simulation = simulation.with_store(store);
    }
    if let Some(path) = &config.report.path {
        simulation = simulation.with_sink(JsonReportSink::new(
            path,
            config.relationships.initial_score,
        ));
    }

    simulation.seed_conversation().context("posting the opening line")?;
    for event in &cli.events {
        simulation
            .apply_event(event)
            .with_context(|| format!("applying world event '{event}'"))?;
    }
    if !cli.no_stdin {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_stdin_events(tx);
        simulation = simulation.with_events(rx);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current turn");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });

    let summary = simulation.run(cancel, cli.turns).await?;
    println!();
    println!("Остановлено: {} ходов, {} снимков отношений.", summary.turns, summary.snapshots);
    Ok(())
}
