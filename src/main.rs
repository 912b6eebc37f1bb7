use anyhow::Context;
use clap::Parser;
use event_tracker::{HealthCheck, KafkaTracker, LogTracker, Tracker, TrackerConfig};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "event-tracker")]
#[command(about = "Send events read from stdin to Kafka", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "tracker.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Destination topic")]
    topic: String,

    #[arg(short, long, help = "Wait for acknowledgement of every event")]
    safe: bool,

    #[arg(long, help = "Log events instead of sending them")]
    log_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting event-tracker");
    info!("Loading configuration from {:?}", args.config);

    let config = TrackerConfig::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;

    info!(
        kafka_brokers = ?config.kafka.brokers,
        service = %config.metadata.service,
        environment = %config.metadata.environment,
        policy = ?config.delivery.policy,
        queue = ?config.queue_path(),
        "Configuration summary"
    );

    if args.log_only {
        let mut tracker = LogTracker::new("event-tracker", config.metadata.clone());
        let sent = pump(&tracker, &args).await;
        tracker.close().await?;
        return sent;
    }

    let mut tracker = KafkaTracker::connect(&config)
        .await
        .context("failed to create Kafka tracker")?;

    let result = tokio::select! {
        sent = pump(&tracker, &args) => sent,
        reason = tracker.wait_for_worker_failure() => {
            error!(%reason, "Recovery worker failed, stopping");
            Err(anyhow::anyhow!("recovery worker failed: {}", reason))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    if let Err(e) = tracker.check_health() {
        warn!(error = %e, "Tracker unhealthy at shutdown");
    }
    info!("{}", tracker.metrics().render()?);

    tracker.close().await?;
    result
}

/// Sends every stdin line: JSON objects are enriched, anything else goes out
/// as text.
async fn pump(tracker: &dyn Tracker, args: &Args) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0u64;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let mut value = serde_json::from_str::<Value>(&line).unwrap_or(Value::String(line));
        if args.safe {
            tracker.safe_message(&args.topic, &mut value).await?;
        } else {
            tracker.fast_message(&args.topic, &mut value)?;
        }
        count += 1;
    }

    info!(count, topic = %args.topic, "Finished reading events");
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("event_tracker=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("event_tracker=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
