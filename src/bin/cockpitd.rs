//! cockpitd: headless AgentCockpit host.
//!
//! Runs the hook ingress and a notification consumer that logs every
//! record, without a desktop window. Stops on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use agentcockpit_lib::config::CockpitConfig;
use agentcockpit_lib::services::{
    AnySlot, DedupCache, IngressServer, LogBridge, NotificationBus, NotificationConsumer,
};

#[derive(Parser, Debug)]
#[command(name = "cockpitd")]
#[command(version)]
#[command(about = "Headless hook ingress and notification bus for AgentCockpit")]
struct Args {
    /// Config file; the platform config dir when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the ingress port
    #[arg(long)]
    port: Option<u16>,
    /// Override the notification store directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<CockpitConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = CockpitConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env_overrides()?;
            config
        }
        None => CockpitConfig::load().context("loading config")?,
    };
    if let Some(port) = args.port {
        config.ingress.port = port;
    }
    if let Some(dir) = &args.data_dir {
        config.bus.dir = Some(dir.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let store_dir = config.bus.store_dir();
    let bus = Arc::new(
        NotificationBus::open(&store_dir)
            .with_context(|| format!("opening notification store in {}", store_dir.display()))?,
    );

    let ingress = IngressServer::start(
        &config.ingress,
        DedupCache::from_config(&config.dedup),
        bus.clone(),
        Arc::new(AnySlot),
    )
    .context("starting hook ingress")?;

    let consumer = NotificationConsumer::start(
        bus,
        Arc::new(LogBridge),
        config.bus.poll_interval(),
        config.bus.retention(),
    )
    .context("starting notification consumer")?;

    log::info!("cockpitd ready; hooks should POST to {}", ingress.url());

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for Ctrl-C")?;

    log::info!("Shutting down");
    consumer.stop();
    ingress.stop();
    Ok(())
}
