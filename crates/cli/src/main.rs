use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use riff_controllers::{controllers, Context, Settings};
use riff_core::settings;
use riff_kubehub::KubeStore;
use riff_runtime::Tracker;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "riff-manager", version, about = "Riff platform controllers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every controller until interrupted
    Run {
        /// Workers per controller
        #[arg(long, env = "RIFF_WORKERS", default_value_t = 2)]
        workers: usize,
        /// Lifetime of a tracked reference before it must be renewed
        #[arg(long, env = "RIFF_TRACKER_TTL_SECS", default_value_t = 3600)]
        tracker_ttl_secs: u64,
        /// Namespace holding the platform's settings maps
        #[arg(long, env = "RIFF_SYSTEM_NAMESPACE", default_value = settings::SYSTEM_NAMESPACE)]
        system_namespace: String,
        /// Prometheus listen address, e.g. 0.0.0.0:9090
        #[arg(long, env = "RIFF_METRICS_ADDR")]
        metrics_addr: Option<String>,
    },
    /// Print the CustomResourceDefinitions of the platform kinds
    Crds {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Yaml)]
        output: Output,
    },
}

fn init_tracing() {
    let env = std::env::var("RIFF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        },
        Err(_) => warn!(addr = %addr, "invalid RIFF_METRICS_ADDR; expected host:port"),
    }
}

fn print_crds(output: Output) -> Result<()> {
    for crd in riff_schema::crds() {
        match output {
            Output::Yaml => print!("---\n{}", serde_yaml::to_string(&crd)?),
            Output::Json => println!("{}", serde_json::to_string_pretty(&crd)?),
        }
    }
    Ok(())
}

async fn run(workers: usize, tracker_ttl: Duration, system_namespace: String) -> Result<()> {
    let store = Arc::new(KubeStore::try_default().await?);
    let tracker = Arc::new(Tracker::new(tracker_ttl));
    let ctx = Context::new(store, tracker, Settings { system_namespace });

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; shutting down"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c; shutting down"),
        }
        on_signal.cancel();
    });

    let all = controllers(&ctx);
    info!(controllers = all.len(), workers, system_namespace = %ctx.settings.system_namespace, "manager starting");
    join_all(all.into_iter().map(|c| c.run(workers, shutdown.clone()))).await;
    info!("manager stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { workers, tracker_ttl_secs, system_namespace, metrics_addr } => {
            init_tracing();
            init_metrics(metrics_addr.as_deref());
            run(workers.max(1), Duration::from_secs(tracker_ttl_secs), system_namespace).await
        }
        Commands::Crds { output } => print_crds(output),
    }
}
