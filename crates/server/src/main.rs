//! Record-synchronization service binary.
//!
//! Wires together the UDP announcer, the TCP acceptor with admission
//! control, and the processor pipeline built from the resolved config
//! (§5, §6.2).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use recsync_config::{Config, ProcessorKind};
use recsync_core::acceptor::Acceptor;
use recsync_core::admission::AdmissionController;
use recsync_core::announcer::Announcer;
use recsync_core::connection::ConnectionConfig;
use recsync_core::pipeline::{PipelineDispatcher, Processor};
use recsync_processors::directory::{DirectoryProcessor, HttpDirectoryClient};
use recsync_processors::PrintProcessor;
use recsync_wire::AnnounceFrame;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "recsync-server")]
#[command(about = "Record-synchronization service")]
struct Args {
    /// Path to an ini-style config file. Falls back to `/etc/recceiver.conf`,
    /// then `~/.recceiver.conf`, then a print-only default.
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::resolve(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // No tracing subscriber yet: this is a config-parse failure,
            // report it straight to stderr before we know the log format.
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.service.loglevel))
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();

    let processors = build_processors(&config)?;
    let dispatcher = Arc::new(PipelineDispatcher::new(processors));
    dispatcher.start_all().await?;
    info!(processors = ?dispatcher.processor_names(), "processor pipeline started");

    let acceptor = Acceptor::bind(SocketAddr::V4(config.service.bind)).await?;
    let bound = acceptor.local_addr()?;
    info!(%bound, "listening");

    let admission = Arc::new(AdmissionController::new(config.service.max_active));
    let connection_config = ConnectionConfig {
        ping_timeout: config.service.tcp_timeout,
        commit_interval: config.service.commit_interval,
        commit_size_limit: config.service.commit_size_limit,
    };

    let std::net::IpAddr::V4(bound_ip) = bound.ip() else {
        return Err("bound to a non-IPv4 address".into());
    };
    let server_key: u32 = rand::rng().random();
    let announce_frame = AnnounceFrame {
        addr: bound_ip.octets(),
        tcp_port: bound.port(),
        server_key,
    };
    let announcer = Announcer::start(bound_ip, config.service.addrlist.clone(), config.service.announce_interval)
        .await?;

    let announce_task = tokio::spawn(announcer.run(announce_frame, shutdown.clone()));
    let accept_task = tokio::spawn(acceptor.run(admission, dispatcher.clone(), connection_config, shutdown.clone()));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    shutdown.cancel();

    let _ = announce_task.await;
    let _ = accept_task.await;
    dispatcher.stop_all().await;

    Ok(())
}

fn build_processors(config: &Config) -> Result<Vec<Arc<dyn Processor>>, Box<dyn std::error::Error>> {
    let mut processors: Vec<Arc<dyn Processor>> = Vec::new();
    for entry in &config.processors {
        match &entry.kind {
            ProcessorKind::Print => {
                processors.push(Arc::new(PrintProcessor::new(entry.instance_name.clone())));
            }
            ProcessorKind::Directory(directory_config) => {
                let client = Arc::new(HttpDirectoryClient::new(directory_config.base_url.clone()));
                processors.push(Arc::new(DirectoryProcessor::new(
                    entry.instance_name.clone(),
                    (**directory_config).clone(),
                    client,
                )));
            }
        }
    }
    Ok(processors)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
