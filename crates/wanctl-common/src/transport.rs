//! RouterOS command transports
//!
//! [`FailoverTransport`] holds a primary transport and builds the fallback
//! only after the primary first fails. Once failed over it stays on the
//! fallback until [`FailoverTransport::reset_to_primary`] is called.

use crate::{WanctlError, WanctlResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Executes a RouterOS CLI command and returns its output
#[async_trait]
pub trait RouterTransport: Send + Sync {
    /// Short name for logs and errors
    fn name(&self) -> &'static str;

    /// Run one command
    async fn run_cmd(&self, cmd: &str) -> WanctlResult<String>;
}

/// Builds the fallback transport on demand
pub type TransportFactory = Box<dyn Fn() -> WanctlResult<Arc<dyn RouterTransport>> + Send + Sync>;

/// Primary transport with a lazily constructed fallback
pub struct FailoverTransport {
    primary: Arc<dyn RouterTransport>,
    fallback_factory: Option<TransportFactory>,
    fallback: Mutex<Option<Arc<dyn RouterTransport>>>,
    using_fallback: AtomicBool,
}

impl FailoverTransport {
    /// Create without a fallback
    pub fn new(primary: Arc<dyn RouterTransport>) -> Self {
        Self {
            primary,
            fallback_factory: None,
            fallback: Mutex::new(None),
            using_fallback: AtomicBool::new(false),
        }
    }

    /// Attach a fallback factory
    pub fn with_fallback(mut self, factory: TransportFactory) -> Self {
        self.fallback_factory = Some(factory);
        self
    }

    /// Whether commands currently go through the fallback
    pub fn using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::Relaxed)
    }

    /// Return to the primary transport
    pub fn reset_to_primary(&self) {
        if self.using_fallback.swap(false, Ordering::Relaxed) {
            tracing::info!(primary = self.primary.name(), "transport reset to primary");
        }
    }

    fn fallback_client(&self) -> WanctlResult<Option<Arc<dyn RouterTransport>>> {
        let Some(factory) = &self.fallback_factory else {
            return Ok(None);
        };
        let mut slot = self.fallback.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Some(existing.clone()));
        }
        let client = factory()?;
        *slot = Some(client.clone());
        Ok(Some(client))
    }
}

#[async_trait]
impl RouterTransport for FailoverTransport {
    fn name(&self) -> &'static str {
        if self.using_fallback() {
            "failover:fallback"
        } else {
            "failover:primary"
        }
    }

    async fn run_cmd(&self, cmd: &str) -> WanctlResult<String> {
        if self.using_fallback() {
            if let Some(fallback) = self.fallback_client()? {
                return fallback.run_cmd(cmd).await;
            }
        }

        let primary_err = match self.primary.run_cmd(cmd).await {
            Ok(out) => return Ok(out),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback_client()? else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "primary transport failed, switching to fallback"
        );
        self.using_fallback.store(true, Ordering::Relaxed);
        fallback.run_cmd(cmd).await
    }
}

/// SSH connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u32,
    pub command_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host: "192.168.88.1".into(),
            user: "admin".into(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 5,
            command_timeout_secs: 15,
        }
    }
}

/// Runs commands through the system `ssh` client
pub struct SshTransport {
    settings: SshSettings,
}

impl SshTransport {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RouterTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn run_cmd(&self, cmd: &str) -> WanctlResult<String> {
        let s = &self.settings;
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", s.connect_timeout_secs))
            .arg("-p")
            .arg(s.port.to_string());
        if let Some(identity) = &s.identity_file {
            command.arg("-i").arg(identity);
        }
        command.arg(format!("{}@{}", s.user, s.host)).arg(cmd);
        command.kill_on_drop(true);

        let output = tokio::time::timeout(
            Duration::from_secs(s.command_timeout_secs),
            command.output(),
        )
        .await
        .map_err(|_| WanctlError::transient("ssh", format!("command timed out: {}", cmd)))??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            check_routeros_output(&stdout)?;
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lower = stderr.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("authentication") {
            Err(WanctlError::fatal_transport("ssh", stderr.trim().to_string()))
        } else {
            Err(WanctlError::transient("ssh", stderr.trim().to_string()))
        }
    }
}

/// REST API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
    pub verify_tls: bool,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: "https://192.168.88.1".into(),
            user: "admin".into(),
            password: String::new(),
            timeout_secs: 10,
            verify_tls: false,
        }
    }
}

/// RouterOS REST `/rest/execute` client
pub struct RestTransport {
    settings: RestSettings,
    client: reqwest::Client,
}

impl RestTransport {
    pub fn new(settings: RestSettings) -> WanctlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| WanctlError::Config(format!("REST client: {}", e)))?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl RouterTransport for RestTransport {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn run_cmd(&self, cmd: &str) -> WanctlResult<String> {
        let url = format!("{}/rest/execute", self.settings.base_url.trim_end_matches('/'));
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .json(&serde_json::json!({ "script": cmd, "as-string": true }))
            .send()
            .await
            .map_err(|e| WanctlError::transient("rest", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WanctlError::transient("rest", e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WanctlError::fatal_transport("rest", format!("{}: {}", status, text)));
        }
        if status.is_client_error() {
            return Err(WanctlError::Router(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(WanctlError::transient("rest", format!("{}: {}", status, text)));
        }

        // {"ret": "..."} when as-string is honoured
        let out = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("ret").and_then(|r| r.as_str()).map(String::from))
            .unwrap_or(text);
        check_routeros_output(&out)?;
        Ok(out)
    }
}

/// RouterOS reports script errors on stdout with a zero exit status
fn check_routeros_output(out: &str) -> WanctlResult<()> {
    let lower = out.to_ascii_lowercase();
    if lower.contains("syntax error") || lower.contains("expected end of command") || lower.contains("failure:") {
        return Err(WanctlError::Router(out.trim().to_string()));
    }
    Ok(())
}
