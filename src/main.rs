// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use edgelb::{
    config::Options,
    constants::{METRICS_SERVER_BIND_ADDRESS, TOKIO_WORKER_THREADS},
    drivers::DriverFactory,
    leader, metrics,
    naming::NameGenerator,
    server, supervisor,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("edgelb-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Respects RUST_LOG (default info) and RUST_LOG_FORMAT (json or text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    // kube and reqwest both link rustls; pin the process-wide provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let options = Options::parse();
    options.validate()?;

    info!("Starting edgelb load balancer controller");

    let factory = DriverFactory::new(options.nat_appliance_config()?, options.lb_appliance_config()?)?;
    let names = NameGenerator::new(options.identity_address());
    debug!(salt = %names.salt(), "Naming salt derived from control plane address");

    debug!("Initializing Kubernetes client");
    let client = options.kube_client().await?;
    debug!("Kubernetes client initialized successfully");

    let listener = TcpListener::bind((METRICS_SERVER_BIND_ADDRESS, options.metrics_port))
        .await
        .with_context(|| format!("failed to bind metrics port {}", options.metrics_port))?;
    let metrics_path = options.metrics_path.clone();
    let metrics_server = async move { server::serve(listener, &metrics_path).await };

    let election = options.election_settings();
    let settings = options.supervisor_settings();
    metrics::LEADER_STATUS
        .with_label_values(&[election.identity.as_str()])
        .set(0.0);

    let controllers = leader::run_as_leader(client.clone(), &election, || {
        supervisor::run(client.clone(), &factory, &names, settings)
    });

    tokio::select! {
        result = controllers => {
            error!("CRITICAL: controllers stopped: {:?}", result);
            result?;
            anyhow::bail!("controllers exited unexpectedly without error")
        }
        result = metrics_server => {
            error!("CRITICAL: metrics server stopped: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        signal = shutdown_signal() => {
            let signal = signal?;
            info!(signal = signal, "Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}

/// Resolves with the signal name on SIGTERM (pod termination) or SIGINT.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT").map_err(Into::into),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}
