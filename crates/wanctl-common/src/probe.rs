//! Active probes
//!
//! - `PingRttSource`: system `ping`, mean of reply times
//! - `TcpConnectivityCheck`: TCP connect to configured targets
//! - `GatewayPingCheck`: ping the upstream gateway
//! - `CompositeConnectivityCheck`: any member passing means the link is up

use crate::router::{ConnectivityCheck, RttSource};
use crate::{RetryPolicy, WanctlError, WanctlResult};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;

/// RTT via the system `ping` binary
#[derive(Debug, Clone)]
pub struct PingRttSource {
    /// Per-reply timeout in seconds (`-W`)
    reply_timeout_secs: u32,
    /// Interval between probes (`-i`)
    interval: Duration,
    /// Source interface (`-I`)
    interface: Option<String>,
}

impl PingRttSource {
    pub fn new(reply_timeout_secs: u32) -> Self {
        Self {
            reply_timeout_secs: reply_timeout_secs.max(1),
            interval: Duration::from_millis(200),
            interface: None,
        }
    }

    /// Bind probes to a source interface
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }
}

impl Default for PingRttSource {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl RttSource for PingRttSource {
    async fn measure_rtt(&self, host: &str, count: u32) -> WanctlResult<f64> {
        let count = count.max(1);
        let mut cmd = Command::new("ping");
        cmd.arg("-n")
            .arg("-q")
            .arg("-c")
            .arg(count.to_string())
            .arg("-W")
            .arg(self.reply_timeout_secs.to_string())
            .arg("-i")
            .arg(format!("{:.1}", self.interval.as_secs_f64()));
        if let Some(iface) = &self.interface {
            cmd.arg("-I").arg(iface);
        }
        cmd.arg(host).kill_on_drop(true);

        let budget = ping_budget(count, self.reply_timeout_secs);
        let output = tokio::time::timeout(budget, cmd.output())
            .await
            .map_err(|_| WanctlError::Probe {
                message: format!("ping {} timed out", host),
                retryable: true,
            })??;

        // -q prints only the summary; parse both forms
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_output(&stdout).ok_or_else(|| WanctlError::Probe {
            message: format!("no ping replies from {}", host),
            retryable: true,
        })
    }
}

/// Whole run bounded by count * (timeout + interval) plus slack
fn ping_budget(count: u32, reply_timeout_secs: u32) -> Duration {
    let secs = u64::from(count)
        .saturating_mul(u64::from(reply_timeout_secs) + 1)
        .saturating_add(2);
    Duration::from_secs(secs)
}

/// Mean RTT from per-reply `time=` lines, else the summary `avg`
pub fn parse_ping_output(out: &str) -> Option<f64> {
    static REPLY: OnceLock<Option<Regex>> = OnceLock::new();
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    let reply = REPLY.get_or_init(|| Regex::new(r"time[=<]([\d.]+)\s*ms").ok());
    let summary =
        SUMMARY.get_or_init(|| Regex::new(r"= [\d.]+/([\d.]+)/[\d.]+(?:/[\d.]+)? ms").ok());

    if let Some(reply) = reply {
        let times: Vec<f64> = reply
            .captures_iter(out)
            .filter_map(|c| c[1].parse().ok())
            .collect();
        if !times.is_empty() {
            return Some(times.iter().sum::<f64>() / times.len() as f64);
        }
    }

    summary.as_ref()?.captures(out).and_then(|c| c[1].parse().ok())
}

/// Probe every host with retries and return the median of the successes
///
/// Fails with the last error only when no host answered.
pub async fn measure_hosts(
    source: &dyn RttSource,
    hosts: &[String],
    count: u32,
    retry: &RetryPolicy,
) -> WanctlResult<f64> {
    let mut samples = Vec::with_capacity(hosts.len());
    let mut last_err = None;
    for host in hosts {
        match retry.run("ping", || source.measure_rtt(host, count)).await {
            Ok(rtt) if rtt.is_finite() && rtt >= 0.0 => samples.push(rtt),
            Ok(rtt) => tracing::debug!(host = %host, rtt, "discarding invalid RTT sample"),
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "ping failed");
                last_err = Some(e);
            }
        }
    }

    if samples.is_empty() {
        return Err(last_err.unwrap_or_else(|| WanctlError::Probe {
            message: "no ping hosts configured".into(),
            retryable: false,
        }));
    }
    samples.sort_by(f64::total_cmp);
    let mid = samples.len() / 2;
    Ok(if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    })
}

/// TCP reachability to configured `host:port` targets
#[derive(Debug, Clone)]
pub struct TcpConnectivityCheck {
    targets: Vec<String>,
    timeout: Duration,
}

impl TcpConnectivityCheck {
    pub fn new(targets: Vec<String>, timeout: Duration) -> Self {
        Self { targets, timeout }
    }
}

#[async_trait]
impl ConnectivityCheck for TcpConnectivityCheck {
    async fn check(&self) -> bool {
        for target in &self.targets {
            match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(target.as_str())).await {
                Ok(Ok(_)) => {
                    tracing::debug!(target = %target, "TCP connectivity check passed");
                    return true;
                }
                Ok(Err(e)) => tracing::debug!(target = %target, error = %e, "TCP connect failed"),
                Err(_) => tracing::debug!(target = %target, "TCP connect timeout"),
            }
        }
        false
    }
}

/// Gateway reachability through an `RttSource`
pub struct GatewayPingCheck {
    source: Arc<dyn RttSource>,
    gateway: String,
}

impl GatewayPingCheck {
    pub fn new(source: Arc<dyn RttSource>, gateway: &str) -> Self {
        Self {
            source,
            gateway: gateway.to_string(),
        }
    }
}

#[async_trait]
impl ConnectivityCheck for GatewayPingCheck {
    async fn check(&self) -> bool {
        self.source.measure_rtt(&self.gateway, 1).await.is_ok()
    }
}

/// Passes when any member check passes
#[derive(Default)]
pub struct CompositeConnectivityCheck {
    checks: Vec<Arc<dyn ConnectivityCheck>>,
}

impl CompositeConnectivityCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, check: Arc<dyn ConnectivityCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[async_trait]
impl ConnectivityCheck for CompositeConnectivityCheck {
    async fn check(&self) -> bool {
        for check in &self.checks {
            if check.check().await {
                return true;
            }
        }
        false
    }
}
