//! SubHub - CLI entry point
//!
//! Runs the sync pipeline once, on an interval, and/or serves the HTTP
//! facade over the emitted artifacts.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use subhub_rust::hub::{start_server, AppState};
use subhub_rust::{Config, SyncPipeline, VERSION};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "subhub-rust")]
#[command(version = VERSION)]
#[command(about = "Subscription aggregation and node curation pipeline")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// State directory override
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Artifact directory override
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Run one sync pass and exit
    #[arg(long = "sync")]
    sync: bool,

    /// Serve the HTTP facade
    #[arg(long = "serve")]
    serve: bool,

    /// Facade listen address (overrides config)
    #[arg(long = "listen")]
    listen: Option<String>,

    /// Re-run the sync every N minutes (0 = disabled)
    #[arg(long = "interval", default_value_t = 0)]
    interval: u64,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // Pick the crypto provider once for every rustls client in the process
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("subhub-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration before logging so LOG_LEVEL can steer the filter
    let mut config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        let mut config = Config::default();
        config.apply_env();
        config
    };

    let filter = config
        .log_level
        .clone()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    info!("SubHub v{}", VERSION);
    if args.config.exists() {
        info!("configuration loaded from {}", args.config.display());
    } else {
        warn!(
            "configuration file {} not found, using defaults",
            args.config.display()
        );
    }

    // CLI overrides
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    if args.test {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        info!("configuration test passed");
        return Ok(());
    }

    let listen_addr = config
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", config.listen, e))?;
    let config = Arc::new(config);
    let pipeline = SyncPipeline::new((*config).clone());

    // HTTP facade in the background
    if args.serve {
        let state = AppState::new(Arc::clone(&config));
        tokio::spawn(async move {
            if let Err(e) = start_server(state, listen_addr).await {
                error!("HTTP facade error: {}", e);
            }
        });
    }

    // One-shot sync
    if args.sync || (!args.serve && args.interval == 0) {
        if let Err(e) = pipeline.run().await {
            error!("sync failed: {}", e);
            std::process::exit(1);
        }
        if !args.serve {
            return Ok(());
        }
    }

    // Interval scheduler; stops scheduling on ctrl-c and exits cleanly
    if args.interval > 0 {
        let period = std::time::Duration::from_secs(args.interval * 60);
        loop {
            if let Err(e) = pipeline.run().await {
                error!("sync failed, next run in {} minutes: {}", args.interval, e);
            }
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    // Serve-only: wait for shutdown
    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    Ok(())
}
