use std::{io, path::PathBuf};

use clap::Parser;
use log::info;
use machine_learning::{
    loader,
    partition::{FsPartitionCache, ModelPartitioner},
};
use tokio::sync::mpsc;

use server::{
    InferenceServer, ServerConfig, ShutdownSignal,
    fleet::{self, DeviceMonitor, LogLauncher},
};

/// Serves the tail of a split chest X-ray classifier.
#[derive(Parser)]
struct Args {
    /// A JSON configuration file, the flags below override it.
    #[arg(long, env = "SERVER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SERVER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[arg(long, env = "SERVER_ARCHITECTURE")]
    architecture: Option<String>,

    #[arg(long, env = "SERVER_MANIFEST")]
    manifest: Option<PathBuf>,

    #[arg(long, env = "SERVER_WEIGHTS")]
    weights: Option<PathBuf>,

    #[arg(long, env = "SERVER_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    #[arg(long, env = "SERVER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> io::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.cache_dir = cache_dir;
        }
        if let Some(architecture) = self.architecture {
            config.architecture = architecture;
        }
        if self.manifest.is_some() {
            config.manifest = self.manifest;
        }
        if self.weights.is_some() {
            config.weights = self.weights;
        }
        if self.max_connections.is_some() {
            config.max_connections = self.max_connections;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let config = Args::parse().into_config()?;

    let partitioner = ModelPartitioner::new(FsPartitionCache::new(&config.cache_dir));
    let partition = partitioner
        .partition_or_load(&config.architecture, || {
            loader::load_graph(
                &config.architecture,
                config.manifest.as_deref(),
                config.weights.as_deref(),
            )
        })
        .map_err(server::ServerErr::from)?;

    let server = InferenceServer::bind(&config, partition.tail).await?;
    let mut addr = server.local_addr()?;
    if addr.ip().is_unspecified() {
        addr.set_ip(comms::local_ip());
    }

    if !config.fleet.devices.is_empty() {
        let (tx, rx) = mpsc::channel(config.fleet.devices.len());
        let monitor = DeviceMonitor::new(config.fleet.devices.clone());
        let launcher = LogLauncher::new(config.fleet.clone());

        tokio::spawn(monitor.run(tx));
        tokio::spawn(fleet::drive(rx, launcher, addr.to_string()));
        info!(devices = config.fleet.devices.len(); "watching the fleet");
    }

    let mut signal = ShutdownSignal::new()?;
    server
        .serve_until(async move {
            let name = signal.recv().await;
            info!(signal = name; "shutting down");
        })
        .await
}
