//! wanctl Configuration

use serde::Deserialize;
use std::path::Path;
use wanctl_autorate::AutorateConfig;
use wanctl_common::acl::RouterOsSettings;
use wanctl_common::transport::{RestSettings, SshSettings};
use wanctl_common::{RetryPolicy, WanctlError, WanctlResult};
use wanctl_steering::SteeringConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WanctlConfig {
    /// Name of the primary WAN (state labels, log spans)
    pub wan_name: String,
    pub logging: LoggingConfig,
    pub router: RouterConfig,
    pub autorate: AutorateConfig,
    pub steering: SteeringConfig,
}

impl Default for WanctlConfig {
    fn default() -> Self {
        Self {
            wan_name: "wan1".into(),
            logging: LoggingConfig::default(),
            router: RouterConfig::default(),
            autorate: AutorateConfig::default(),
            steering: SteeringConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// How commands reach RouterOS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub transport: TransportKind,
    /// Built on the first primary failure
    pub fallback_transport: Option<TransportKind>,
    pub ssh: SshSettings,
    pub rest: RestSettings,
    pub routeros: RouterOsSettings,
    /// Applied to every RouterOS command
    pub retry: RetryPolicy,
    /// Per-reply ping timeout in seconds
    pub ping_timeout_secs: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Ssh,
            fallback_transport: Some(TransportKind::Rest),
            ssh: SshSettings::default(),
            rest: RestSettings::default(),
            routeros: RouterOsSettings::default(),
            retry: RetryPolicy::default(),
            ping_timeout_secs: 1,
        }
    }
}

impl WanctlConfig {
    /// Load from a YAML file and validate
    pub fn load(path: &Path) -> WanctlResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> WanctlResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| WanctlError::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Every section must hold; any violation is fatal at startup
    pub fn validate(&self) -> WanctlResult<()> {
        if self.wan_name.trim().is_empty() {
            return Err(WanctlError::Config("wan_name must not be empty".into()));
        }
        if self.router.fallback_transport == Some(self.router.transport) {
            return Err(WanctlError::Config(
                "router.fallback_transport must differ from router.transport".into(),
            ));
        }
        self.autorate.validate()?;
        self.steering.validate()
    }

    /// Run the confidence overlay in shadow mode
    pub fn enable_dry_run(&mut self) {
        self.steering.confidence.enabled = true;
        self.steering.confidence.dry_run = true;
    }
}
