//! CLI entry point for the GTFS-RT feeder.
//!
//! `run` polls the upstream bus and train feeds and publishes incremental
//! GTFS-realtime updates; `resolve` is a one-shot block-activation probe for
//! debugging schedule data.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use gtfs_rt_feeder::activation::BlockActivationResolver;
use gtfs_rt_feeder::feeder::Feeder;
use gtfs_rt_feeder::fetch::BasicClient;
use gtfs_rt_feeder::schedule::ScheduleIndex;
use gtfs_rt_feeder::sink::SnapshotFileSink;
use gtfs_rt_feeder::vehicles::{HttpBusSource, HttpTrainSource};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_feeder")]
#[command(about = "Resolve live vehicle reports against a static schedule and publish GTFS-RT", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the vehicle feeds and publish incremental updates
    Run {
        /// Bus schedule snapshot (JSON)
        #[arg(long)]
        bus_schedule: String,

        /// Rail schedule snapshot (JSON)
        #[arg(long)]
        rail_schedule: String,

        /// Upstream bus snapshot endpoint
        #[arg(long)]
        bus_url: String,

        /// Upstream train snapshot endpoint
        #[arg(long)]
        rail_url: String,

        /// Bus poll interval in seconds
        #[arg(long, default_value_t = 15)]
        bus_interval: u64,

        /// Rail poll interval in seconds
        #[arg(long, default_value_t = 30)]
        rail_interval: u64,

        /// Directory the feed snapshots are written to
        #[arg(short, long, default_value = "feeds")]
        output_dir: String,
    },
    /// Resolve a block id against a schedule snapshot
    Resolve {
        /// Schedule snapshot (JSON)
        #[arg(value_name = "SCHEDULE")]
        schedule: String,

        /// Block id to resolve
        #[arg(value_name = "BLOCK_ID")]
        block_id: String,

        /// Observation instant (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Override the automatic service-day lookback
        #[arg(long)]
        max_lookback: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_feeder.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_feeder.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bus_schedule,
            rail_schedule,
            bus_url,
            rail_url,
            bus_interval,
            rail_interval,
            output_dir,
        } => {
            run_feeder(
                &bus_schedule,
                &rail_schedule,
                bus_url,
                rail_url,
                bus_interval,
                rail_interval,
                &output_dir,
            )
            .await?;
        }
        Commands::Resolve {
            schedule,
            block_id,
            at,
            max_lookback,
        } => {
            let schedule = Arc::new(ScheduleIndex::from_json_file(&schedule)?);
            let resolver = BlockActivationResolver::new(schedule);
            let at = at.unwrap_or_else(Utc::now);

            match resolver.resolve(&block_id, at, max_lookback) {
                Ok(activated) => {
                    println!(
                        "block {} at {} -> trip {} (route {}) on service date {}",
                        block_id,
                        at,
                        activated.trip.id,
                        activated.trip.route_id,
                        activated.service_date
                    );
                }
                Err(e) => {
                    println!("block {block_id} at {at}: {e}");
                }
            }
        }
    }

    Ok(())
}

#[tracing::instrument(skip(bus_url, rail_url), fields(bus_schedule, rail_schedule, output_dir))]
async fn run_feeder(
    bus_schedule: &str,
    rail_schedule: &str,
    bus_url: String,
    rail_url: String,
    bus_interval: u64,
    rail_interval: u64,
    output_dir: &str,
) -> Result<()> {
    info!("loading schedule snapshots");
    let bus_schedule = Arc::new(ScheduleIndex::from_json_file(bus_schedule)?);
    let rail_schedule = Arc::new(ScheduleIndex::from_json_file(rail_schedule)?);

    std::fs::create_dir_all(output_dir)?;
    let out = Path::new(output_dir);

    let feeder = Feeder::new(
        bus_schedule,
        rail_schedule,
        HttpBusSource::new(BasicClient::new(), bus_url),
        HttpTrainSource::new(BasicClient::new(), rail_url),
        SnapshotFileSink::new(out.join("vehicle_positions.pb")),
        SnapshotFileSink::new(out.join("trip_updates.pb")),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
    };

    feeder
        .run(
            Duration::from_secs(bus_interval),
            Duration::from_secs(rail_interval),
            shutdown,
        )
        .await;

    info!("feeder stopped");
    Ok(())
}
