//! RouterOS Adapter (ACL)
//!
//! Implements [`RouterControl`] and [`CakeStatsSource`] over any
//! [`RouterTransport`].

use crate::router::{CakeStats, CakeStatsSource, RouterControl};
use crate::transport::RouterTransport;
use crate::{RetryPolicy, WanctlError, WanctlResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Names of the RouterOS objects wanctl manages
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterOsSettings {
    /// Comment identifying the mangle rule that steers latency-sensitive traffic
    pub steering_rule_comment: String,
    /// Queue tree entry shaping download
    pub download_queue: String,
    /// Queue tree entry shaping upload
    pub upload_queue: String,
}

impl Default for RouterOsSettings {
    fn default() -> Self {
        Self {
            steering_rule_comment: "ADAPTIVE: Steer latency-sensitive to ALT".into(),
            download_queue: "WAN-Download".into(),
            upload_queue: "WAN-Upload".into(),
        }
    }
}

/// Cumulative counters from the previous read
#[derive(Debug, Clone, Copy, Default)]
struct CumulativeCounters {
    dropped: u64,
    packets: u64,
    bytes: u64,
}

/// RouterOS adapter
pub struct RouterOs {
    transport: Arc<dyn RouterTransport>,
    settings: RouterOsSettings,
    retry: RetryPolicy,
    previous: Mutex<HashMap<String, CumulativeCounters>>,
}

impl RouterOs {
    /// Create new adapter
    pub fn new(transport: Arc<dyn RouterTransport>, settings: RouterOsSettings) -> Self {
        Self {
            transport,
            settings,
            retry: RetryPolicy::default(),
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Set retry policy for every command
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run(&self, cmd: &str) -> WanctlResult<String> {
        tracing::debug!(transport = self.transport.name(), cmd, "routeros command");
        self.retry.run("routeros", || self.transport.run_cmd(cmd)).await
    }

    async fn toggle_steering(&self, enable: bool) -> WanctlResult<()> {
        let comment = &self.settings.steering_rule_comment;
        let verb = if enable { "enable" } else { "disable" };
        self.run(&format!("/ip firewall mangle {} [find comment=\"{}\"]", verb, comment))
            .await?;

        let expected_disabled = if enable { "no" } else { "yes" };
        let out = self
            .run(&format!(
                "/ip firewall mangle print count-only where comment=\"{}\" and disabled={}",
                comment, expected_disabled
            ))
            .await?;

        match parse_count(&out) {
            Some(n) if n > 0 => Ok(()),
            _ => Err(WanctlError::Router(format!(
                "steering rule '{}' did not verify after {} (output: {})",
                comment,
                verb,
                out.trim()
            ))),
        }
    }

    fn to_delta(&self, queue: &str, raw: &HashMap<String, u64>) -> CakeStats {
        let current = CumulativeCounters {
            dropped: raw.get("dropped").copied().unwrap_or(0),
            packets: raw.get("packets").copied().unwrap_or(0),
            bytes: raw.get("bytes").copied().unwrap_or(0),
        };

        let mut previous = self.previous.lock();
        // First read and counter resets yield zero deltas
        let delta = match previous.get(queue) {
            Some(prev) => CakeStats {
                dropped: current.dropped.saturating_sub(prev.dropped),
                packets: current.packets.saturating_sub(prev.packets),
                bytes: current.bytes.saturating_sub(prev.bytes),
                queued_packets: 0,
                queued_bytes: 0,
            },
            None => CakeStats::default(),
        };
        previous.insert(queue.to_string(), current);

        CakeStats {
            queued_packets: raw.get("queued-packets").copied().unwrap_or(0),
            queued_bytes: raw.get("queued-bytes").copied().unwrap_or(0),
            ..delta
        }
    }
}

#[async_trait]
impl RouterControl for RouterOs {
    async fn enable_steering(&self) -> WanctlResult<()> {
        self.toggle_steering(true).await
    }

    async fn disable_steering(&self) -> WanctlResult<()> {
        self.toggle_steering(false).await
    }

    async fn set_limits(&self, download_bps: u64, upload_bps: u64) -> WanctlResult<()> {
        self.run(&format!(
            "/queue tree set [find name=\"{}\"] max-limit={}",
            self.settings.download_queue, download_bps
        ))
        .await?;
        self.run(&format!(
            "/queue tree set [find name=\"{}\"] max-limit={}",
            self.settings.upload_queue, upload_bps
        ))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CakeStatsSource for RouterOs {
    async fn read_stats(&self, queue: &str) -> WanctlResult<CakeStats> {
        let out = self
            .run(&format!(
                "/queue tree print stats without-paging where name=\"{}\"",
                queue
            ))
            .await?;

        let raw = parse_counters(&out);
        if !raw.contains_key("dropped") || !raw.contains_key("queued-packets") {
            return Err(WanctlError::Probe {
                message: format!("no CAKE stats for queue '{}'", queue),
                retryable: false,
            });
        }
        Ok(self.to_delta(queue, &raw))
    }
}

/// Extract `key=123` pairs (first occurrence wins)
fn parse_counters(out: &str) -> HashMap<String, u64> {
    static PAIR: OnceLock<Option<Regex>> = OnceLock::new();
    let mut map = HashMap::new();
    let Some(re) = PAIR.get_or_init(|| Regex::new(r"([a-z][a-z-]*)=(\d+)\b").ok()) else {
        return map;
    };

    for cap in re.captures_iter(out) {
        if let Ok(v) = cap[2].parse::<u64>() {
            map.entry(cap[1].to_string()).or_insert(v);
        }
    }
    map
}

fn parse_count(out: &str) -> Option<u64> {
    out.split_whitespace().next()?.parse().ok()
}
