//! wanctl - Main Entry Point
//!
//! ```bash
//! wanctl --config /etc/wanctl/wanctl.yaml autorate
//! wanctl --config /etc/wanctl/wanctl.yaml steering --dry-run
//! ```
//!
//! SIGUSR1 to a steering daemon clears the confidence timers and flap brake.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wanctl_autorate::{AutorateDaemon, AutorateDeps, WanController};
use wanctl_common::acl::RouterOs;
use wanctl_common::probe::{
    CompositeConnectivityCheck, GatewayPingCheck, PingRttSource, TcpConnectivityCheck,
};
use wanctl_common::transport::{FailoverTransport, RestTransport, RouterTransport, SshTransport};
use wanctl_common::{ConnectivityCheck, MetricsSink, RecorderMetrics, RttSource, WanctlResult};
use wanctl_signal::FallbackConfig;
use wanctl_steering::{SteeringController, SteeringDaemon, SteeringDeps};

mod config;

use config::{RouterConfig, TransportKind, WanctlConfig};

#[derive(Parser)]
#[command(name = "wanctl")]
#[command(version)]
#[command(about = "Adaptive CAKE shaping and WAN steering for RouterOS", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "WANCTL_CONFIG", default_value = "/etc/wanctl/wanctl.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the CAKE bandwidth controller
    Autorate,
    /// Run the WAN steering daemon
    Steering {
        /// Log confidence decisions without touching the router
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = WanctlConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("wanctl v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let router = build_router(&config.router).context("building RouterOS client")?;
    let rtt: Arc<dyn RttSource> = Arc::new(PingRttSource::new(config.router.ping_timeout_secs));
    let metrics: Arc<dyn MetricsSink> = Arc::new(RecorderMetrics);

    match cli.command {
        Commands::Autorate => {
            let deps = AutorateDeps {
                rtt: rtt.clone(),
                router,
                connectivity: connectivity(&config.autorate.fallback, rtt),
                metrics,
            };
            let controller = WanController::new(&config.wan_name, config.autorate, deps)?;
            AutorateDaemon::new(controller).run(shutdown_rx).await?;
        }
        Commands::Steering { dry_run } => {
            if dry_run {
                config.enable_dry_run();
            }
            let deps = SteeringDeps {
                rtt: rtt.clone(),
                cake: router.clone(),
                router,
                connectivity: connectivity(&config.steering.fallback, rtt),
                metrics,
            };
            let controller = SteeringController::new(&config.wan_name, config.steering, deps)?;
            let daemon = SteeringDaemon::new(controller);
            tokio::spawn(reset_signal(daemon.reset_handle()));
            daemon.run(shutdown_rx).await?;
        }
    }

    Ok(())
}

fn transport(kind: TransportKind, config: &RouterConfig) -> WanctlResult<Arc<dyn RouterTransport>> {
    Ok(match kind {
        TransportKind::Ssh => Arc::new(SshTransport::new(config.ssh.clone())),
        TransportKind::Rest => Arc::new(RestTransport::new(config.rest.clone())?),
    })
}

fn build_router(config: &RouterConfig) -> WanctlResult<Arc<RouterOs>> {
    let mut failover = FailoverTransport::new(transport(config.transport, config)?);
    if let Some(kind) = config.fallback_transport {
        let config_for_fallback = config.clone();
        failover = failover.with_fallback(Box::new(move || transport(kind, &config_for_fallback)));
    }
    Ok(Arc::new(
        RouterOs::new(Arc::new(failover), config.routeros.clone()).with_retry(config.retry),
    ))
}

fn connectivity(fallback: &FallbackConfig, rtt: Arc<dyn RttSource>) -> Arc<dyn ConnectivityCheck> {
    let mut check = CompositeConnectivityCheck::new();
    if !fallback.tcp_targets.is_empty() {
        check = check.with(Arc::new(TcpConnectivityCheck::new(
            fallback.tcp_targets.clone(),
            Duration::from_millis(fallback.tcp_timeout_ms),
        )));
    }
    if let Some(gateway) = &fallback.gateway {
        check = check.with(Arc::new(GatewayPingCheck::new(rtt, gateway)));
    }
    Arc::new(check)
}

/// Flip the shutdown channel on SIGINT or SIGTERM
async fn shutdown_signal(tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested, finishing current cycle");
    let _ = tx.send(true);
}

/// Forward every SIGUSR1 as a confidence reset
#[cfg(unix)]
async fn reset_signal(reset: Arc<Notify>) {
    let mut usr1 = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
        Ok(usr1) => usr1,
        Err(e) => {
            tracing::warn!(error = %e, "failed to listen for SIGUSR1");
            return;
        }
    };
    while usr1.recv().await.is_some() {
        tracing::info!("SIGUSR1 received, resetting confidence timers");
        reset.notify_one();
    }
}

#[cfg(not(unix))]
async fn reset_signal(_reset: Arc<Notify>) {}
