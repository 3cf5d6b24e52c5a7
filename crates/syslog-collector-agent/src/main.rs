// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use syslog_collector::{
    config::{self, log_level::LogLevel, Config, LogFormat, LoggingConfig},
    forwarder::{BatchForwarder, HttpForwarder},
    queue::{BatchQueue, MessageSink},
    tcp::TcpListener,
    udp::UdpListener,
};

/// Keeps dependency chatter out of the collector's own logs.
const QUIET_TARGETS: &str = "h2=off,hyper=off,hyper_util=off,reqwest=off,rustls=off";

#[derive(Parser, Debug)]
#[command(version, about = "Receives syslog over UDP and TCP and forwards it in JSON batches")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = Args::parse();

    // Config is read before the real subscriber exists, so anything it logs
    // goes through a default one.
    let loaded = tracing::subscriber::with_default(
        subscriber(LoggingConfig {
            level: LogLevel::default(),
            format: LogFormat::Text,
        }),
        || config::get_config(args.config.as_deref()),
    );

    let logging = loaded
        .as_ref()
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber(logging)) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    run(config).await
}

fn subscriber(logging: LoggingConfig) -> Box<dyn tracing::Subscriber + Send + Sync> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{QUIET_TARGETS},{}", logging.level.as_ref())))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    match logging.format {
        LogFormat::Json => Box::new(builder.json().finish()),
        LogFormat::Text => Box::new(builder.finish()),
    }
}

async fn run(config: Config) -> ExitCode {
    let cancel_token = CancellationToken::new();

    let forwarder = match HttpForwarder::new(config.http_forwarder()) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            error!("Unable to create HTTP forwarder: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Forwarding to {}", forwarder.backend_url());

    let queue = Arc::new(BatchQueue::new(
        config.batch_queue(),
        Arc::new(forwarder) as Arc<dyn BatchForwarder>,
        cancel_token.clone(),
    ));
    let queue_handle = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.run().await })
    };

    if config.udp.enabled {
        let sink = Arc::clone(&queue) as Arc<dyn MessageSink>;
        match UdpListener::bind(&config.udp_listener(), sink).await {
            Ok(listener) => {
                if let Ok(addr) = listener.local_addr() {
                    info!("UDP listener started on {addr}");
                }
                tokio::spawn(listener.spin(cancel_token.clone()));
            }
            Err(e) => {
                error!("Unable to start UDP listener: {e}");
                cancel_token.cancel();
                return ExitCode::FAILURE;
            }
        }
    }

    let tcp = if config.tcp.enabled {
        let sink = Arc::clone(&queue) as Arc<dyn MessageSink>;
        match TcpListener::bind(&config.tcp_listener(), sink).await {
            Ok(listener) => {
                info!("TCP listener started on {}", listener.local_addr());
                let listener = Arc::new(listener);
                let spinner = Arc::clone(&listener);
                let token = cancel_token.clone();
                tokio::spawn(async move { spinner.spin(token).await });
                Some(listener)
            }
            Err(e) => {
                error!("Unable to start TCP listener: {e}");
                cancel_token.cancel();
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    shutdown_signal().await;
    info!("Shutting down syslog collector");

    cancel_token.cancel();
    if let Some(tcp) = tcp {
        tcp.stop();
    }
    if let Err(e) = queue_handle.await {
        error!("Batch queue task failed: {e}");
        return ExitCode::FAILURE;
    }

    let stats = queue.stats();
    info!(
        "Stopped. evicted_messages={} dispatched_batches={} inline_batches={} dropped_batches={}",
        stats.evicted_messages, stats.dispatched_batches, stats.inline_batches, stats.dropped_batches
    );
    ExitCode::SUCCESS
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
