//! Binary entry point for `movesmart-backend`.
//!
//! This module provides the command-line interface for the backend with
//! options for configuration file paths and logging verbosity, plus
//! subcommands for seeding demo accounts and one-shot data collection.

use clap::{Parser, Subcommand};
use movesmart_backend::{
    base::{
        config::Config,
        types::{CollectionType, Void},
    },
    collector::tasks,
    geo,
    runtime::Runtime,
};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// MoveSmart backend – traffic monitoring for Kenyan cities.
///
/// Configuration can come from `movesmart.toml` or environment variables.
/// The server exposes the REST API and runs periodic collection of live
/// traffic data from the TomTom API.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the server will look for a config file at `movesmart.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server and background collectors (the default).
    Serve,
    /// Ensure demo accounts exist.
    Seed {
        /// Also create the demo admin account.
        #[arg(long)]
        with_demo_users: bool,
    },
    /// Run a one-shot data collection and print the results.
    Collect {
        /// Specific city to collect for; all cities when omitted.
        #[arg(long)]
        city: Option<String>,
        /// What to collect: incidents, traffic_flow, or combined.
        #[arg(long, default_value = "combined")]
        collection_type: String,
    },
}

/// Main entry point for the backend binary.
///
/// Sets up logging based on verbosity, loads configuration, and runs the
/// selected command.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("movesmart-backend");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).init();

    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => movesmart_backend::start(config).await,
        Command::Seed { with_demo_users } => {
            let runtime = Runtime::new(config).await?;
            runtime.seed(with_demo_users).await
        }
        Command::Collect { city, collection_type } => {
            let runtime = Runtime::new(config).await?;
            run_collection(&runtime, city.as_deref(), &collection_type).await
        }
    }
}

/// One-shot collection run, printing per-city statistics as JSON.
async fn run_collection(runtime: &Runtime, city: Option<&str>, collection_type: &str) -> Void {
    let collection_type = match collection_type {
        "incidents" => CollectionType::Incidents,
        "traffic_flow" => CollectionType::TrafficFlow,
        "combined" => CollectionType::Combined,
        other => return Err(anyhow::anyhow!("Unknown collection type `{other}`. Use incidents, traffic_flow, or combined.")),
    };

    let retry_delay = std::time::Duration::from_secs(60);

    let results = match city {
        Some(city) => {
            let Some(info) = geo::find_city(city) else {
                return Err(anyhow::anyhow!("Unknown city '{city}'. Available cities: {:?}", geo::city_keys()));
            };

            let mut result = tasks::CityCollectionResult {
                city: info.key.to_string(),
                incident_stats: None,
                flow_stats: None,
                error: None,
            };

            if matches!(collection_type, CollectionType::Incidents | CollectionType::Combined) {
                result.incident_stats = Some(tasks::collect_incident_data(&runtime.db, &runtime.traffic, info).await?);
            }
            if matches!(collection_type, CollectionType::TrafficFlow | CollectionType::Combined) {
                result.flow_stats = Some(tasks::collect_traffic_flow_data(&runtime.db, &runtime.traffic, info).await?);
            }

            vec![result]
        }
        None => tasks::collect_all_cities(&runtime.db, &runtime.traffic, collection_type, retry_delay).await,
    };

    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}
