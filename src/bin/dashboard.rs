use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use apiary_telemetry::{
    TimeRange,
    config::{Config, StoreConfig, read_config_file},
    session::DashboardSession,
    store::{MemoryStore, RestStore, TelemetryStore},
    util::{apply_env_overrides, get_config_path},
};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to APIARY_CONFIG, then ./apiary.json)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Apiary to load
    #[arg(short, long)]
    apiary: Option<String>,

    /// Hive to load and follow live
    #[arg(long)]
    hive: Option<String>,

    /// Time range preset: 1h, 6h, 24h, 7d or 30d
    #[arg(short, long, default_value = "24h")]
    range: String,

    /// Print the loaded view and exit without following live updates
    #[arg(long)]
    once: bool,

    /// Print the export payload instead of the view model
    #[arg(long)]
    export: bool,

    /// Log at trace level
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("apiary_telemetry", level),
        ("dashboard", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn TelemetryStore>> {
    let store: Arc<dyn TelemetryStore> = match &config.store {
        StoreConfig::Memory { fixture: Some(path) } => Arc::new(
            MemoryStore::from_fixture(path)
                .await
                .with_context(|| format!("failed to load fixture {}", path.display()))?,
        ),
        StoreConfig::Memory { fixture: None } => Arc::new(MemoryStore::new()),
        StoreConfig::Rest(rest) => {
            Arc::new(RestStore::new(rest.clone()).context("failed to create REST store")?)
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config_path = get_config_path(args.file.clone());
    let mut config = if config_path.exists() {
        read_config_file(&config_path)?
    } else {
        warn!("config file {} not found, using defaults", config_path.display());
        Config::default()
    };
    apply_env_overrides(&mut config);

    let store = build_store(&config).await?;
    let mut session = DashboardSession::new(store, config);

    let range = TimeRange::preset(&args.range);
    session
        .set_time_range(range)
        .await
        .context("failed to load initial view")?;

    if let Some(apiary) = &args.apiary {
        session
            .select_apiary(apiary.clone())
            .await
            .with_context(|| format!("failed to load apiary {apiary}"))?;
    }
    if let Some(hive) = &args.hive {
        session
            .select_hive(hive.clone())
            .await
            .with_context(|| format!("failed to load hive {hive}"))?;
    }

    if args.export {
        println!("{}", serde_json::to_string(&session.export_current_view()?)?);
    } else if let Some(view) = session.current_view() {
        println!("{}", serde_json::to_string(view)?);
    }

    if args.once || args.hive.is_none() {
        session.close().await?;
        return Ok(());
    }

    follow(&session).await?;
    session.close().await?;
    Ok(())
}

/// Print every live view update as one JSON line until interrupted
#[instrument(skip_all)]
async fn follow(session: &DashboardSession) -> anyhow::Result<()> {
    let mut updates = session.updates();
    debug!("following live updates");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => println!("{}", serde_json::to_string(&update.view)?),
                Err(RecvError::Lagged(skipped)) => warn!("skipped {skipped} view updates"),
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }

    Ok(())
}
