//! # AAFS — Automatic Aftershock Forecast Scheduler
//!
//! Runs the task dispatcher and posts tasks to its queue.
//!
//! Usage:
//!   aafs start                          # Run the dispatcher until a stop request
//!   aafs stop                           # Ask a running dispatcher to shut down
//!   aafs add-event ci38457511           # Start tracking an event
//!   aafs analyst ci38457511 --stop      # Analyst stop of a timeline
//!   aafs show ci38457511                # Timeline, queued tasks and log

use std::path::PathBuf;
use std::sync::Arc;

use aafs_core::{AafsConfig, ConfigHandle, Rupture, ServerClock};
use aafs_scheduler::payload::{self, AnalystIntervene, AnalystStateChange, ConsoleMessage, IntakePublish};
use aafs_scheduler::task::{EVID_POLL, EVID_SHUTDOWN, EXEC_TIME_SHUTDOWN, SUBID_CLI};
use aafs_scheduler::timeline::AnalystOptions;
use aafs_scheduler::{
    Dispatcher, GenericRjEngine, MemoryEventSource, NewTask, Opcode, OutboxPublisher, Services, SqliteProvider,
    Store, StoreProvider, TaskQuery, TimelineStatus,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "aafs",
    version,
    about = "🌋 AAFS — Automatic Aftershock Forecast Scheduler"
)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher until a shutdown task arrives
    Start {
        /// Freeze the dispatch clock at this epoch-millisecond time
        #[arg(long)]
        frozen_at: Option<i64>,
    },
    /// Post a shutdown request
    Stop,
    /// Intake an event from the catalog
    AddEvent { event_id: String },
    /// Intake an event as reported by the publication feed
    FeedIntake {
        #[arg(long)]
        event_id: String,
        #[arg(long)]
        time: i64,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long, default_value = "10.0")]
        depth: f64,
        #[arg(long)]
        mag: f64,
    },
    /// Analyst intervention on an event's timeline
    Analyst {
        event_id: String,
        #[arg(long, conflicts_with = "stop")]
        start: bool,
        #[arg(long)]
        stop: bool,
        /// Create the timeline if the event is not tracked yet
        #[arg(long)]
        create: bool,
        #[arg(long, default_value = "operator")]
        analyst_id: String,
        #[arg(long, default_value = "")]
        remark: String,
        /// One extra forecast lag, milliseconds after the mainshock
        #[arg(long)]
        extra_lag: Option<i64>,
        /// Model parameter overrides, as JSON
        #[arg(long)]
        params: Option<String>,
    },
    /// Begin polling the catalog for new events
    StartPoll,
    /// Stop polling the catalog
    StopPoll,
    /// Write a message to the dispatcher log
    Message {
        message: String,
        #[arg(long, default_value = "0")]
        stage: i32,
    },
    /// Run the next queued task, advancing a frozen clock to it
    RunNext {
        /// Repeat until the queue is empty
        #[arg(long)]
        all: bool,
    },
    /// Show an event's timeline, queued tasks and log
    Show { event_id: String },
    /// Validate the configuration and print it
    CheckConfig,
}

const EVID_CONSOLE: &str = "===console===";

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn build_services(config: &AafsConfig) -> Result<Services> {
    let source = match &config.services.catalog_path {
        Some(path) => MemoryEventSource::from_json_file(&expand_path(path))?,
        None => {
            tracing::warn!("⚠️  No services.catalog_path configured; the catalog is empty");
            MemoryEventSource::default()
        }
    };
    let key = config.services.signing_key.clone().into_bytes();
    let publisher = match &config.services.outbox_dir {
        Some(dir) => OutboxPublisher::with_outbox(key, expand_path(dir)),
        None => OutboxPublisher::in_memory(key),
    };
    Ok(Services {
        source: Arc::new(source),
        engine: Arc::new(GenericRjEngine::default()),
        publisher: Arc::new(publisher),
    })
}

fn open_store(config: &AafsConfig) -> Result<(Arc<SqliteProvider>, Arc<dyn Store>)> {
    let provider = Arc::new(SqliteProvider::new(expand_path(&config.store.path)));
    let store = provider
        .connect()
        .with_context(|| format!("opening task store {}", provider.path().display()))?;
    Ok((provider, store))
}

/// Queue one task in the configured store.
fn queue(config: &AafsConfig, task: NewTask) -> Result<()> {
    let (_, store) = open_store(config)?;
    let summary = task.clone().into_pending().summary();
    if store.submit(task)? {
        println!("✅ Queued {summary}");
    } else {
        println!("⚠️  Already queued: {summary}");
    }
    Ok(())
}

fn show(store: &dyn Store, event_id: &str) -> Result<()> {
    let timeline_id = store.resolve_alias(event_id)?.unwrap_or_else(|| event_id.to_string());
    match store.latest_timeline(&timeline_id)? {
        Some(entry) => {
            let status = TimelineStatus::from_entry(&entry)?;
            println!("📈 Timeline {} ({} entries)", timeline_id, store.timeline_history(&timeline_id)?.len());
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        None => println!("📭 No timeline for {event_id}"),
    }

    for id in [event_id, timeline_id.as_str()] {
        for task in store.query_tasks(&TaskQuery::for_event(id))? {
            println!("⏳ {}", task.summary());
        }
        for log in store.logs_for_event(id)? {
            println!("📝 {}", serde_json::to_string(&log)?);
        }
        if id == timeline_id {
            break;
        }
    }
    Ok(())
}

fn analyst_request(
    start: bool,
    stop: bool,
    create: bool,
    analyst_id: String,
    remark: String,
    extra_lag: Option<i64>,
    params: Option<String>,
) -> Result<AnalystIntervene> {
    let state_change = match (start, stop) {
        (true, _) => AnalystStateChange::Start,
        (_, true) => AnalystStateChange::Stop,
        _ => AnalystStateChange::None,
    };
    let params = match params {
        Some(json) => Some(serde_json::from_str(&json).context("--params must be JSON")?),
        None => None,
    };
    let analyst = (extra_lag.is_some() || params.is_some() || !remark.is_empty()).then(|| AnalystOptions {
        analyst_id,
        remark,
        time: now_ms(),
        params: params.unwrap_or_default(),
        extra_forecast_lag: extra_lag,
    });
    Ok(AnalystIntervene {
        state_change,
        create_timeline: create,
        analyst,
    })
}

/// Run the next queued task, or with `all` every task queued at or before the
/// latest execution time found when the command started. Feed polls restage
/// themselves forever, so the cutoff is what ends the loop.
async fn run_queued(dispatcher: &Dispatcher, store: &dyn Store, all: bool) -> Result<usize> {
    if !all {
        return Ok(usize::from(dispatcher.run_next_task().await?));
    }
    let Some(cutoff) = store.query_tasks(&TaskQuery::default())?.iter().map(|t| t.exec_time).max() else {
        return Ok(0);
    };
    let mut ran = 0;
    while dispatcher.run_next_task_until(cutoff).await? {
        ran += 1;
    }
    Ok(ran)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "aafs=debug,aafs_scheduler=debug,aafs_core=debug"
    } else {
        "aafs=info,aafs_scheduler=info,aafs_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(AafsConfig::default_path);
    let handle = Arc::new(ConfigHandle::from_path(&config_path)?);
    let config = handle.snapshot();

    config.validate()?;
    let now = now_ms();

    match cli.command {
        Command::Start { frozen_at } => {
            let clock = Arc::new(match frozen_at {
                Some(at) => ServerClock::frozen(at),
                None => ServerClock::live(),
            });
            let (provider, _) = open_store(&config)?;
            let dispatcher = Dispatcher::new(provider, handle.clone(), clock, build_services(&config)?);
            println!("🌋 AAFS v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Store:      {}", config.store.path);
            println!("   ⚙️  Config:     {}", config_path.display());
            println!("   🪪 Dispatcher: {}", dispatcher.owner());
            println!();
            dispatcher.run().await?;
            let status = dispatcher.status();
            println!(
                "👋 Stopped after {} tasks, {} restarts",
                status.tasks_dispatched, status.restarts
            );
        }
        Command::Stop => {
            queue(
                &config,
                NewTask::new(EVID_SHUTDOWN, Opcode::Shutdown, EXEC_TIME_SHUTDOWN, now, SUBID_CLI),
            )?;
        }
        Command::AddEvent { event_id } => {
            queue(&config, NewTask::new(event_id, Opcode::IntakeSync, now, now, SUBID_CLI))?;
        }
        Command::FeedIntake {
            event_id,
            time,
            lat,
            lon,
            depth,
            mag,
        } => {
            let request = IntakePublish {
                reported: Rupture::new(event_id.clone(), time, lat, lon, depth, mag),
                analyst: None,
            };
            queue(
                &config,
                NewTask::new(event_id, Opcode::IntakePdl, now, now, SUBID_CLI).with_details(payload::encode(&request)),
            )?;
        }
        Command::Analyst {
            event_id,
            start,
            stop,
            create,
            analyst_id,
            remark,
            extra_lag,
            params,
        } => {
            let request = analyst_request(start, stop, create, analyst_id, remark, extra_lag, params)?;
            queue(
                &config,
                NewTask::new(event_id, Opcode::AnalystIntervene, now, now, SUBID_CLI)
                    .with_details(payload::encode(&request)),
            )?;
        }
        Command::StartPoll => {
            queue(&config, NewTask::new(EVID_POLL, Opcode::PollStart, now, now, SUBID_CLI))?;
        }
        Command::StopPoll => {
            queue(&config, NewTask::new(EVID_POLL, Opcode::PollStop, now, now, SUBID_CLI))?;
        }
        Command::Message { message, stage } => {
            queue(
                &config,
                NewTask::new(EVID_CONSOLE, Opcode::ConsoleMessage, now, now, SUBID_CLI)
                    .with_stage(stage)
                    .with_details(payload::encode(&ConsoleMessage { message })),
            )?;
        }
        Command::RunNext { all } => {
            let (provider, store) = open_store(&config)?;
            let clock = Arc::new(ServerClock::frozen(0));
            let dispatcher = Dispatcher::new(provider, handle.clone(), clock.clone(), build_services(&config)?);
            let ran = run_queued(&dispatcher, store.as_ref(), all).await?;
            println!("⚙️  Ran {ran} task(s); clock at {}", clock.dispatch_time());
        }
        Command::Show { event_id } => {
            let (_, store) = open_store(&config)?;
            show(store.as_ref(), &event_id)?;
        }
        Command::CheckConfig => {
            println!("✅ {} is valid\n", config_path.display());
            println!("{}", serde_json::to_string_pretty(config.as_ref())?);
        }
    }

    Ok(())
}
