//! widget-consumer CLI — drain pending widget requests into storage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use tracing::info;
use widget_consumer::backend::{AttributeBackend, FlatBackend};
use widget_consumer::config::Config;
use widget_consumer::db::Db;
use widget_consumer::source::pgmq::PgmqConfig;
use widget_consumer::source::{DirectorySource, PgmqSource, WorkSource};
use widget_consumer::store::{FsObjectStore, PgAttributeStore, WriteMode};
use widget_consumer::telemetry::{TelemetryConfig, init_telemetry};
use widget_consumer::{Consumer, ConsumerConfig, DecodeFailurePolicy, Dispatcher};

#[derive(Parser)]
#[command(
    name = "widget-consumer",
    about = "Apply pending widget change-requests to storage"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drain all pending requests, then exit
    Drain(DrainArgs),
    /// Send request files to a pgmq queue
    Enqueue {
        /// Queue name
        #[arg(long)]
        queue: String,
        /// JSON request files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["queue", "requests_dir"])))]
#[command(group(clap::ArgGroup::new("backend").required(true).args(["flat_dir", "table"])))]
struct DrainArgs {
    /// pgmq queue holding pending requests
    #[arg(long)]
    queue: Option<String>,
    /// Directory holding pending request files, processed in name order
    #[arg(long)]
    requests_dir: Option<PathBuf>,
    /// Root directory of the flat object store
    #[arg(long)]
    flat_dir: Option<PathBuf>,
    /// Postgres table of widget attribute rows
    #[arg(long)]
    table: Option<String>,
    /// Messages read per queue poll
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(i32).range(1..))]
    batch_size: i32,
    /// Seconds a read queue message stays hidden
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i32).range(1..))]
    visibility_timeout: i32,
    /// Pause after the first empty poll, in milliseconds
    #[arg(long, default_value_t = 100)]
    idle_pause_ms: u64,
    /// Where unprocessable request files go (directory source only)
    #[arg(long)]
    dead_letter_dir: Option<PathBuf>,
    /// What to do with requests that cannot be decoded
    #[arg(long, value_enum, default_value_t = OnDecodeFailure::DeadLetter)]
    on_decode_failure: OnDecodeFailure,
    /// Fail creates for widgets that already exist (attribute table only)
    #[arg(long)]
    create_if_absent: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnDecodeFailure {
    DeadLetter,
    Leave,
}

impl From<OnDecodeFailure> for DecodeFailurePolicy {
    fn from(value: OnDecodeFailure) -> Self {
        match value {
            OnDecodeFailure::DeadLetter => DecodeFailurePolicy::DeadLetter,
            OnDecodeFailure::Leave => DecodeFailurePolicy::Leave,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "widget-consumer".to_string(),
        default_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Drain(args) => cmd_drain(&config, args).await,
        Command::Enqueue { queue, files } => cmd_enqueue(&config, queue, files).await,
    }
}

/// Connect only when a Postgres collaborator is selected; reuse the pool.
async fn connect(config: &Config, db: &mut Option<Db>, needed_by: &str) -> anyhow::Result<Db> {
    if let Some(db) = db {
        return Ok(db.clone());
    }
    let url = config.require_database_url(needed_by)?;
    let connected = Db::connect(url.expose_secret()).await?;
    *db = Some(connected.clone());
    Ok(connected)
}

async fn cmd_drain(config: &Config, args: DrainArgs) -> anyhow::Result<()> {
    let mut db: Option<Db> = None;

    let source: Arc<dyn WorkSource> = match (args.queue, args.requests_dir) {
        (Some(queue), _) => {
            let pool = connect(config, &mut db, "--queue").await?;
            let source = PgmqSource::new(
                pool,
                PgmqConfig {
                    queue,
                    batch_size: args.batch_size,
                    visibility_timeout: args.visibility_timeout,
                },
            )?;
            source.create_queue().await?;
            Arc::new(source)
        }
        (None, Some(dir)) => {
            let mut source = DirectorySource::new(dir);
            if let Some(dead) = args.dead_letter_dir {
                source = source.with_dead_letter_dir(dead);
            }
            Arc::new(source)
        }
        (None, None) => anyhow::bail!("one of --queue or --requests-dir is required"),
    };

    let dispatcher = match (args.flat_dir, args.table) {
        (Some(root), _) => Dispatcher::flat(FlatBackend::new(Arc::new(FsObjectStore::new(root)))),
        (None, Some(table)) => {
            let pool = connect(config, &mut db, "--table").await?;
            let store = PgAttributeStore::new(pool, table)?;
            store.ensure_table().await?;
            let mode = if args.create_if_absent {
                WriteMode::IfAbsent
            } else {
                WriteMode::Overwrite
            };
            Dispatcher::attribute(AttributeBackend::new(Arc::new(store)).with_create_mode(mode))
        }
        (None, None) => anyhow::bail!("one of --flat-dir or --table is required"),
    };

    let consumer = Consumer::new(
        source,
        dispatcher,
        ConsumerConfig {
            idle_pause: Duration::from_millis(args.idle_pause_ms),
            decode_failures: args.on_decode_failure.into(),
        },
    );

    let ctrl = consumer.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    let report = consumer.run().await?;
    println!("{report}");
    Ok(())
}

async fn cmd_enqueue(config: &Config, queue: String, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let url = config.require_database_url("enqueue")?;
    let db = Db::connect(url.expose_secret()).await?;
    let source = PgmqSource::new(db, PgmqConfig::new(queue))?;
    source.create_queue().await?;

    for file in files {
        let text = tokio::fs::read_to_string(&file).await?;
        let payload: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {e}", file.display()))?;
        let msg_id = source.send(&payload).await?;
        info!(file = %file.display(), msg_id, "request enqueued");
        println!("{}: {msg_id}", file.display());
    }
    Ok(())
}
