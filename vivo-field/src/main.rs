//! vivo-field - command-line front end for a field device
//!
//! One-shot commands record data or sync; `run` keeps the health probe and
//! the sync scheduler going until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;
use vivo_common::config::{load_toml_config, resolve_root_folder};
use vivo_common::models::ExitType;
use vivo_common::wire::{ExitInput, Mutation, ObservationInput, SampleInput, SamplesBatch};
use vivo_field::config::{FieldConfig, MODULE_NAME};
use vivo_field::connectivity::HealthProbe;
use vivo_field::scheduler::report_task_exit;
use vivo_field::{store, ConnectivityState, FieldClient, HttpTransport, SubmitOutcome, SyncTransport};

#[derive(Parser, Debug)]
#[command(name = "vivo-field")]
#[command(about = "Offline-first data capture and sync for Vivo field devices")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "VIVO_FIELD_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL
    #[arg(long, env = "VIVO_SERVER_URL")]
    server: Option<String>,

    /// Data folder holding the local store
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Explicit local store file (overrides the data folder)
    #[arg(long, env = "VIVO_FIELD_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show queue and connectivity state
    Status,
    /// Push queued mutations now
    Sync,
    /// Refresh the cached snapshot of an experiment
    Pull {
        experiment_id: i64,
    },
    /// Record a clinical observation
    Observe {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        stool: Option<i64>,
        #[arg(long)]
        behavior: Option<i64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record a subject exit, optionally with a final weight
    Exit {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        date: NaiveDate,
        /// natural_death, humane_endpoint, scheduled_sacrifice or excluded
        #[arg(long = "type")]
        exit_type: ExitType,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        final_weight: Option<f64>,
    },
    /// Record a collected sample
    Sample {
        #[arg(long)]
        subject: i64,
        #[arg(long = "type")]
        sample_type: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Drop a queued mutation without sending it
    Discard {
        id: Uuid,
    },
    /// Keep probing and syncing until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: FieldConfig =
        load_toml_config(args.config.as_deref(), MODULE_NAME).context("Failed to load configuration")?;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    vivo_common::logging::init_tracing(&config.logging, &["vivo_field", "vivo_common"])
        .context("Failed to initialize logging")?;

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), config.root_folder.as_deref());
    let db_path = config.database_path(&root_folder);
    let pool = store::open(&db_path).await.context("Failed to open local store")?;

    let transport: Arc<dyn SyncTransport> = Arc::new(
        HttpTransport::new(&config.server_url, config.request_timeout()).context("Failed to build HTTP client")?,
    );
    let connectivity = Arc::new(ConnectivityState::new(false));
    let client = FieldClient::new(pool, Arc::clone(&transport), connectivity.clone());
    let probe = HealthProbe::new(
        connectivity,
        transport,
        client.events().clone(),
        config.probe_interval(),
    );

    if !matches!(args.command, Command::Run) {
        probe.probe().await;
    }

    match args.command {
        Command::Status => print_json(&client.status().await?)?,
        Command::Sync => print_json(&client.sync_now().await?)?,
        Command::Pull { experiment_id } => {
            client.refresh_experiment(experiment_id).await?;
            print_json(&client.cache().sync_meta(experiment_id).await?)?;
        }
        Command::Observe {
            subject,
            date,
            weight,
            stool,
            behavior,
            notes,
        } => {
            let mutation = Mutation::CreateObservation(ObservationInput {
                subject_id: subject,
                observation_date: date,
                weight,
                stool_score: stool,
                behavior_score: behavior,
                notes,
            });
            report_submit(client.submit(mutation).await?);
        }
        Command::Exit {
            subject,
            date,
            exit_type,
            reason,
            final_weight,
        } => {
            let final_observation = final_weight.map(|weight| ObservationInput {
                subject_id: subject,
                observation_date: date,
                weight: Some(weight),
                stool_score: None,
                behavior_score: None,
                notes: None,
            });
            let mutation = Mutation::RecordExit(ExitInput {
                subject_id: subject,
                exit_date: date,
                exit_type,
                exit_reason: reason,
                final_observation,
            });
            report_submit(client.submit(mutation).await?);
        }
        Command::Sample {
            subject,
            sample_type,
            date,
            location,
            notes,
        } => {
            let mutation = Mutation::CreateSamplesBatch(SamplesBatch {
                samples: vec![SampleInput {
                    subject_id: subject,
                    sample_type,
                    collection_date: date,
                    storage_location: location,
                    notes,
                }],
            });
            report_submit(client.submit(mutation).await?);
        }
        Command::Discard { id } => {
            if client.discard(id).await? {
                println!("discarded {}", id);
            } else {
                println!("{} is not queued", id);
            }
        }
        Command::Run => run(client, probe, &config).await?,
    }

    Ok(())
}

async fn run(client: FieldClient, probe: HealthProbe, config: &FieldConfig) -> Result<()> {
    info!("Starting Vivo field sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Server: {}", config.server_url);

    let cancel = CancellationToken::new();
    let scheduler = client.scheduler(config.sync_interval(), config.max_backoff());

    let probe_task = tokio::spawn(probe.run(cancel.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");
    cancel.cancel();

    let (probe_result, scheduler_result) = tokio::join!(probe_task, scheduler_task);
    report_task_exit("health probe", probe_result);
    report_task_exit("sync scheduler", scheduler_result);
    info!("Field sync stopped");
    Ok(())
}

fn report_submit(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Sent(result) if result.success && !result.is_conflict() => println!("applied {}", result.id),
        SubmitOutcome::Sent(result) => println!(
            "{} {}: {}",
            if result.is_conflict() { "conflict" } else { "rejected" },
            result.id,
            result.error.unwrap_or_default()
        ),
        SubmitOutcome::Queued(id) => println!("queued {}", id),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
