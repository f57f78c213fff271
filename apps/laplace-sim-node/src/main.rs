use std::path::PathBuf;

use clap::Parser;
use laplace_middleware::{is_server, BindAddress, GatedPublisher};
use laplace_transport::CancelToken;
use laplace_transport_zmq::ZmqReplyAdapter;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

mod config;
mod simulation;

use crate::config::SimNodeConfig;
use crate::simulation::{run_simulation, StopReason};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.toml, .yaml, .json or .env)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Endpoint or bare port the reply socket binds to
    #[arg(long, short, env = "LAPLACE_BINDING")]
    binding: Option<String>,
}

fn main() {
    let filter = std::env::var("LAPLACE_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match SimNodeConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(2);
        }
    };

    let binding = cli.binding.or_else(|| config.binding.clone());
    let address = match BindAddress::parse(binding.as_deref()) {
        Ok(address) => address,
        Err(err) => {
            error!("{err}");
            std::process::exit(2);
        }
    };

    let shutdown = CancelToken::new();
    if let Err(err) = flag::register(SIGTERM, shutdown.flag()) {
        warn!("SIGTERM handler not installed: {err}");
    }
    if let Err(err) = flag::register(SIGINT, shutdown.flag()) {
        warn!("SIGINT handler not installed: {err}");
    }

    let mut publisher = match GatedPublisher::bind_with(address, |endpoint| {
        ZmqReplyAdapter::bind(config.adapter_config(endpoint))
    }) {
        Ok(publisher) => publisher,
        Err(err) => {
            error!("error starting middleware: {err}");
            std::process::exit(1);
        }
    };
    info!("starting game (server side: {})", is_server());

    let mut rng = rand::thread_rng();
    let report = run_simulation(
        &mut publisher,
        &config.simulation_settings(),
        &mut rng,
        &shutdown,
    );
    let stats = publisher.stats();
    info!(
        "publisher stats: {} publishes, {} replies sent, {} requests received",
        stats.publishes, stats.replies_sent, stats.requests_received
    );
    drop(publisher);

    if report.stop == StopReason::TooManyFailures {
        std::process::exit(1);
    }
}
