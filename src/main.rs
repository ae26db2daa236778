//! Edgepass - CLI entry point
//!
//! Configuration comes from the environment (`USER_ID`, `PASSWORD`,
//! `RELAY_ADDR`, `DOH_URL`, `LOG_LEVEL`, `LISTEN_ADDR`); command-line
//! flags override individual values for quick local runs.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use edgepass::config::LogLevel;
use edgepass::{Config, Gateway, VERSION};
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "edgepass")]
#[command(version = VERSION)]
#[command(about = "Edge-deployed tunneling proxies (VLESS-over-WebSocket + HTTP tunnels)")]
struct Args {
    /// Bind address (overrides LISTEN_ADDR)
    #[arg(short = 'l', long = "listen")]
    listen: Option<SocketAddr>,

    /// VLESS client UUID (overrides USER_ID)
    #[arg(long = "user-id")]
    user_id: Option<String>,

    /// Basic-Auth secret (overrides PASSWORD)
    #[arg(long = "password")]
    password: Option<String>,

    /// Relay fallback host[:port] (overrides RELAY_ADDR)
    #[arg(long = "relay")]
    relay: Option<String>,

    /// DNS-over-HTTPS endpoint (overrides DOH_URL)
    #[arg(long = "doh")]
    doh: Option<String>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long = "log-level")]
    log_level: Option<LogLevel>,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("edgepass-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(user_id) = args.user_id {
        config.user_id = user_id
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid --user-id: {}", e))?;
    }
    if let Some(password) = args.password {
        config.password = password;
    }
    if let Some(relay) = args.relay {
        config.relay_addr = Some(relay);
    }
    if let Some(doh) = args.doh {
        config.doh_url = doh
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid --doh: {}", e))?;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("edgepass={}", config.log_level.as_filter()).parse()?),
        )
        .init();

    info!("edgepass v{}", VERSION);

    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
