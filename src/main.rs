//! Activity Window CLI
//!
//! Replays a daily-activity export through the rolling-window engine.

use activity_window::{
    config::Config,
    source::{JsonlReplayer, ReplayConfig},
    stats::create_shared_stats_with_persistence,
    AggregationEngine, ConsoleChartSink, FanoutSink, JsonlExportSink, SnapshotPublisher,
    StopReason, VERSION,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use activity_window::{BlockingGatewayClient, GatewayConfig, GatewaySink};

#[derive(Parser)]
#[command(name = "activity-window")]
#[command(version = VERSION)]
#[command(about = "Rolling-window aggregation of daily activity records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines export through the engine
    Replay {
        /// JSON-lines file, one daily record per line
        #[arg(long, short)]
        input: PathBuf,

        /// Delay between messages in milliseconds (defaults to the configured interval)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Window length in days (defaults to the configured horizon)
        #[arg(long)]
        horizon: Option<u32>,

        /// Start over from the first line after reaching the end
        #[arg(long)]
        repeat: bool,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<u64>,

        /// Append every published snapshot to this JSON-lines file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Do not draw the console chart
        #[arg(long)]
        no_chart: bool,

        /// Read a daily-activity export: flat `*_time` second counters and `total_calories`
        #[arg(long)]
        activity_time_fields: bool,

        /// Forward snapshots to a renderer gateway (requires gateway feature)
        #[arg(long)]
        gateway: bool,

        /// Gateway port (auto-detected from runtime dir if not specified)
        #[arg(long)]
        gateway_port: Option<u16>,

        /// Gateway token (auto-detected from runtime dir if not specified)
        #[arg(long)]
        gateway_token: Option<String>,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Run the HTTP ingest server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8787")]
        port: u16,

        /// Window length in days (defaults to the configured horizon)
        #[arg(long)]
        horizon: Option<u32>,

        /// Append every published snapshot to this JSON-lines file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

/// Options for `replay`, gathered from the command line.
struct ReplayArgs {
    input: PathBuf,
    interval_ms: Option<u64>,
    horizon: Option<u32>,
    repeat: bool,
    limit: Option<u64>,
    export: Option<PathBuf>,
    no_chart: bool,
    activity_time_fields: bool,
    gateway: bool,
    gateway_port: Option<u16>,
    gateway_token: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            input,
            interval_ms,
            horizon,
            repeat,
            limit,
            export,
            no_chart,
            activity_time_fields,
            gateway,
            gateway_port,
            gateway_token,
        } => cmd_replay(ReplayArgs {
            input,
            interval_ms,
            horizon,
            repeat,
            limit,
            export,
            no_chart,
            activity_time_fields,
            gateway,
            gateway_port,
            gateway_token,
        }),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
        #[cfg(feature = "server")]
        Commands::Serve {
            port,
            horizon,
            export,
        } => cmd_serve(port, horizon, export),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_replay(args: ReplayArgs) -> anyhow::Result<()> {
    println!("Activity Window v{VERSION}");
    println!();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    // Command line wins over the config file
    if let Some(horizon) = args.horizon {
        config.engine.horizon_days = horizon;
    }
    if args.activity_time_fields {
        config.engine.fields = config.engine.fields.clone().with_activity_time_fields();
    }
    let interval = args
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.replay_interval);
    config.engine.validate()?;

    println!("Replaying {:?}", args.input);
    println!("  Horizon: {} days", config.engine.horizon_days);
    println!("  Interval: {}ms", interval.as_millis());
    println!("  Repeat: {}", args.repeat);
    if let Some(limit) = args.limit {
        println!("  Limit: {limit} messages");
    }

    let mut sinks = FanoutSink::new();
    if !args.no_chart {
        sinks.push(Box::new(ConsoleChartSink::stdout()));
    }
    if let Some(path) = &args.export {
        let sink = JsonlExportSink::create(path)
            .with_context(|| format!("Could not open export file {path:?}"))?;
        println!("  Export: {:?}", sink.path());
        sinks.push(Box::new(sink));
    }

    #[cfg_attr(not(feature = "gateway"), allow(unused_mut))]
    let mut background = config.background_publish;

    #[cfg(feature = "gateway")]
    if args.gateway {
        match create_gateway_client(args.gateway_port, args.gateway_token.clone()) {
            Ok(client) => {
                println!("  Gateway: enabled");
                println!("  Device ID: {}", client.device_id());
                match client.test_connection() {
                    Ok(true) => println!("  Gateway connection: OK"),
                    Ok(false) => eprintln!("Warning: Gateway health check failed"),
                    Err(e) => eprintln!("Warning: Could not connect to gateway: {e}"),
                }
                sinks.push(Box::new(GatewaySink::new(client)));
                // Network delivery must not stall the consume loop
                background = true;
            }
            Err(e) => {
                eprintln!("Warning: Gateway initialization failed: {e}");
                eprintln!("Continuing without gateway forwarding.");
            }
        }
    }

    #[cfg(not(feature = "gateway"))]
    if args.gateway || args.gateway_port.is_some() || args.gateway_token.is_some() {
        eprintln!("Warning: --gateway flag ignored (gateway feature not enabled at compile time)");
    }

    if sinks.is_empty() {
        println!("  Output: none (stats only)");
    }

    let stats = create_shared_stats_with_persistence(config.data_path.join("pipeline_stats.json"));
    let publisher = if background {
        SnapshotPublisher::background(sinks, stats.clone())
    } else {
        SnapshotPublisher::inline(sinks, stats.clone())
    };
    let mut engine = AggregationEngine::new(config.engine.clone(), publisher, stats.clone())?;
    println!("Instance ID: {}", engine.instance_id());

    println!();
    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let replay = ReplayConfig::new(&args.input)
        .with_interval(interval)
        .with_repeat(args.repeat);
    let (mut source, handle) = JsonlReplayer::start(replay)
        .with_context(|| format!("Could not start replay of {:?}", args.input))?;

    let summary = engine.run(&mut source, &running, args.limit)?;

    handle.stop();
    drop(source);
    match handle.join() {
        Ok(replay_stats) => tracing::debug!(
            sent = replay_stats.messages_sent,
            passes = replay_stats.passes,
            "Replay reader finished"
        ),
        Err(e) => eprintln!("Warning: Replay reader failed: {e}"),
    }

    // Let the render thread finish the last snapshot before reporting
    engine.shutdown();

    println!();
    match summary.stop_reason {
        StopReason::SourceExhausted => println!("Reached end of input."),
        StopReason::Cancelled => println!("Stopped."),
        StopReason::LimitReached => println!("Message limit reached."),
    }
    println!(
        "{} messages: {} applied, {} stale, {} rejected",
        summary.messages, summary.applied, summary.stale, summary.rejected
    );

    let window = engine.snapshot();
    if let (Some(first), Some(last)) = (window.first_date(), window.last_date()) {
        println!("Window: {} days from {first} to {last}", window.len());
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Activity Window Status");
    println!("======================");
    println!();

    println!("Configuration:");
    println!("  Horizon: {} days", config.engine.horizon_days);
    println!("  Date field: {}", config.engine.fields.date);
    println!(
        "  High-intensity label: {}",
        config.engine.fields.high_intensity_label
    );
    println!("  Replay interval: {}ms", config.replay_interval.as_millis());
    println!(
        "  Publishing: {}",
        if config.background_publish {
            "background"
        } else {
            "inline"
        }
    );
    println!();

    let stats_path = config.data_path.join("pipeline_stats.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for (label, key) in [
                    ("Messages received", "messages_received"),
                    ("Decode failures", "decode_failures"),
                    ("Derivation failures", "derivation_failures"),
                    ("Stale records skipped", "stale_records"),
                    ("Records upserted", "records_upserted"),
                    ("Snapshots published", "snapshots_published"),
                    ("Sink failures", "sink_failures"),
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {label}: {value}");
                    }
                }
                if let Some(updated) = stats.get("last_updated").and_then(|v| v.as_str()) {
                    println!("  Last updated: {updated}");
                }
            }
        }
    } else {
        println!("No previous run data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16, horizon: Option<u32>, export: Option<PathBuf>) -> anyhow::Result<()> {
    use activity_window::server::{self, ServerConfig};

    let mut config = Config::load().unwrap_or_default();
    if let Some(horizon) = horizon {
        config.engine.horizon_days = horizon;
    }

    let mut server_config = ServerConfig::new(port, config.engine);
    if let Some(path) = export {
        server_config = server_config.with_export_path(path);
    }

    let runtime = tokio::runtime::Runtime::new().context("Could not start async runtime")?;
    runtime.block_on(async move {
        let (addr, shutdown) = server::run(server_config).await?;
        println!("Listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown.send(());
        println!("Stopping server...");
        Ok::<(), anyhow::Error>(())
    })
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}

/// Create gateway client from CLI args or runtime directory.
#[cfg(feature = "gateway")]
fn create_gateway_client(
    port: Option<u16>,
    token: Option<String>,
) -> Result<BlockingGatewayClient, activity_window::GatewayError> {
    if let (Some(p), Some(t)) = (port, token.clone()) {
        return BlockingGatewayClient::new(GatewayConfig::new("127.0.0.1", p, t));
    }

    if port.is_some() || token.is_some() {
        eprintln!("Warning: Partial gateway config provided, trying runtime directory...");
    }
    BlockingGatewayClient::from_runtime()
}
