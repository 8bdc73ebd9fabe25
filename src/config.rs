// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable. [`Options::validate`]
//! runs once at startup so misconfiguration fails before any watch starts.
//!
//! # Example
//!
//! ```rust
//! use clap::Parser;
//! use edgelb::config::Options;
//!
//! let options = Options::try_parse_from([
//!     "edgelb",
//!     "--identity-address", "10.96.0.1",
//!     "--nat-appliance", "bigip",
//!     "--nat-appliance-url", "https://bigip.example.com",
//!     "--nat-appliance-username", "admin",
//!     "--nat-appliance-password", "secret",
//!     "--lb-appliance", "netscaler",
//!     "--lb-appliance-url", "https://adc.example.com",
//!     "--lb-appliance-username", "nsroot",
//!     "--lb-appliance-password", "secret",
//! ])
//! .unwrap();
//! assert!(options.validate().is_ok());
//! ```

use crate::constants::{
    DEFAULT_APPLIANCE_TIMEOUT_SECS, DEFAULT_LEASE_NAME, DEFAULT_RESYNC_PERIOD_SECS,
    DEFAULT_SYNC_TIMEOUT_SECS, HEALTHZ_PATH, METRICS_SERVER_PATH, METRICS_SERVER_PORT,
};
use crate::drivers::{ApplianceConfig, ApplianceKind};
use crate::errors::ConfigError;
use crate::leader::ElectionSettings;
use crate::supervisor::SupervisorSettings;
use anyhow::Context;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Fallback election identity when neither `--election-identity` nor `HOSTNAME` is set.
const DEFAULT_IDENTITY: &str = "edgelb";

/// edgelb - converges external load balancer and NAT appliances to Kubernetes resources
#[derive(Parser, Clone)]
#[command(name = "edgelb", version, about, long_about = None, args_override_self = true)]
pub struct Options {
    /// Path to a kubeconfig file. In-cluster configuration is used when absent.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// HTTP path serving Prometheus metrics
    #[arg(long, env = "EDGELB_METRICS_PATH", default_value = METRICS_SERVER_PATH)]
    pub metrics_path: String,

    /// Port of the metrics and health server
    #[arg(long, env = "EDGELB_METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,

    /// Holder identity written to the lease
    #[arg(long, env = "POD_NAME")]
    pub election_identity: Option<String>,

    /// Namespace of the election lease
    #[arg(long, env = "EDGELB_ELECTION_NAMESPACE", default_value = "default")]
    pub election_namespace: String,

    /// Name of the election lease
    #[arg(long, env = "EDGELB_ELECTION_LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    pub election_lease_name: String,

    /// Control plane address used to salt appliance object names
    #[arg(long, env = "KUBERNETES_SERVICE_HOST")]
    pub identity_address: Option<String>,

    /// Seconds to wait for the initial listing of every resource kind
    #[arg(long, env = "EDGELB_SYNC_TIMEOUT_SECS", default_value_t = DEFAULT_SYNC_TIMEOUT_SECS)]
    pub sync_timeout_secs: u64,

    /// Seconds between full resyncs
    #[arg(long, env = "EDGELB_RESYNC_PERIOD_SECS", default_value_t = DEFAULT_RESYNC_PERIOD_SECS)]
    pub resync_period_secs: u64,

    /// Appliance type serving NAT resources (bigip or netscaler)
    #[arg(long, env = "EDGELB_NAT_APPLIANCE", default_value = "bigip")]
    pub nat_appliance: ApplianceKind,

    #[arg(long, env = "EDGELB_NAT_APPLIANCE_URL")]
    pub nat_appliance_url: Option<String>,

    #[arg(long, env = "EDGELB_NAT_APPLIANCE_USERNAME")]
    pub nat_appliance_username: Option<String>,

    #[arg(long, env = "EDGELB_NAT_APPLIANCE_PASSWORD", hide_env_values = true)]
    pub nat_appliance_password: Option<String>,

    /// Appliance type serving load balancer resources (netscaler)
    #[arg(long, env = "EDGELB_LB_APPLIANCE", default_value = "netscaler")]
    pub lb_appliance: ApplianceKind,

    #[arg(long, env = "EDGELB_LB_APPLIANCE_URL")]
    pub lb_appliance_url: Option<String>,

    #[arg(long, env = "EDGELB_LB_APPLIANCE_USERNAME")]
    pub lb_appliance_username: Option<String>,

    #[arg(long, env = "EDGELB_LB_APPLIANCE_PASSWORD", hide_env_values = true)]
    pub lb_appliance_password: Option<String>,

    /// Skip TLS certificate verification for appliance APIs
    #[arg(long, env = "EDGELB_APPLIANCE_INSECURE_TLS")]
    pub appliance_insecure_tls: bool,

    /// Per-request timeout for appliance APIs, in seconds
    #[arg(long, env = "EDGELB_APPLIANCE_TIMEOUT_SECS", default_value_t = DEFAULT_APPLIANCE_TIMEOUT_SECS)]
    pub appliance_timeout_secs: u64,
}

impl Options {
    /// Checks the options for missing or unusable values.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        required("--identity-address", self.identity_address.as_deref())?;

        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                setting: "--metrics-path".to_string(),
                reason: format!("'{}' must start with '/'", self.metrics_path),
            });
        }
        if self.metrics_path == "/" || self.metrics_path == HEALTHZ_PATH {
            return Err(ConfigError::Invalid {
                setting: "--metrics-path".to_string(),
                reason: format!("'{}' is already served", self.metrics_path),
            });
        }
        for (setting, value) in [
            ("--sync-timeout-secs", self.sync_timeout_secs),
            ("--resync-period-secs", self.resync_period_secs),
            ("--appliance-timeout-secs", self.appliance_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    setting: setting.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.lb_appliance == ApplianceKind::BigIp {
            return Err(ConfigError::Invalid {
                setting: "--lb-appliance".to_string(),
                reason: "bigip does not provide content switching; use netscaler".to_string(),
            });
        }

        self.nat_appliance_config()?;
        self.lb_appliance_config()?;
        Ok(())
    }

    /// Connection settings of the NAT appliance.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or credentials are missing or malformed.
    pub fn nat_appliance_config(&self) -> Result<ApplianceConfig, ConfigError> {
        self.appliance_config(
            "nat",
            self.nat_appliance,
            self.nat_appliance_url.as_deref(),
            self.nat_appliance_username.as_deref(),
            self.nat_appliance_password.as_deref(),
        )
    }

    /// Connection settings of the content-switching appliance.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or credentials are missing or malformed.
    pub fn lb_appliance_config(&self) -> Result<ApplianceConfig, ConfigError> {
        self.appliance_config(
            "lb",
            self.lb_appliance,
            self.lb_appliance_url.as_deref(),
            self.lb_appliance_username.as_deref(),
            self.lb_appliance_password.as_deref(),
        )
    }

    fn appliance_config(
        &self,
        family: &str,
        kind: ApplianceKind,
        url: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<ApplianceConfig, ConfigError> {
        let url_flag = format!("--{family}-appliance-url");
        let url = required(&url_flag, url)?;
        let parsed = url::Url::parse(url).map_err(|e| ConfigError::Invalid {
            setting: url_flag.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                setting: url_flag,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(ApplianceConfig {
            kind,
            url: url.trim_end_matches('/').to_string(),
            username: required(&format!("--{family}-appliance-username"), username)?.to_string(),
            password: required(&format!("--{family}-appliance-password"), password)?.to_string(),
            timeout: Duration::from_secs(self.appliance_timeout_secs),
            insecure_tls: self.appliance_insecure_tls,
        })
    }

    /// The naming salt source. Call after [`Options::validate`].
    #[must_use]
    pub fn identity_address(&self) -> &str {
        self.identity_address.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn election_settings(&self) -> ElectionSettings {
        let identity = self
            .election_identity
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());
        ElectionSettings {
            lease_name: self.election_lease_name.clone(),
            namespace: self.election_namespace.clone(),
            identity,
        }
    }

    #[must_use]
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            resync_period: Duration::from_secs(self.resync_period_secs),
        }
    }

    /// Builds a Kubernetes client from `--kubeconfig`, or from the default
    /// inference chain (in-cluster, then `~/.kube/config`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub async fn kube_client(&self) -> anyhow::Result<Client> {
        match &self.kubeconfig {
            Some(path) => {
                let config = load_kube_config(path).await?;
                Client::try_from(config).context("failed to build Kubernetes client")
            }
            None => {
                debug!("No kubeconfig given, inferring client configuration");
                Client::try_default()
                    .await
                    .context("failed to infer Kubernetes client configuration")
            }
        }
    }
}

/// Loads client configuration from a kubeconfig file, using its current context.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not describe a usable context.
pub async fn load_kube_config(path: &Path) -> anyhow::Result<kube::Config> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("invalid kubeconfig {}", path.display()))
}

fn required<'a>(setting: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(setting.to_string())),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
