// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deployer Configuration Types
//
// Defines the configuration schema for the flow deployer, including:
// - Kubernetes-style manifest format (apiVersion/kind/spec)
// - NiFi endpoint and credentials
// - Retry and poll budgets for deployment
// - Controller service name -> id map
// - Shared controller services kept on the canvas root
// - Layout checker thresholds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::metadata::Bundle;

pub const API_VERSION: &str = "flowsmith/v1";
pub const KIND: &str = "DeployerConfig";

/// Top-level Kubernetes-style deployer configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfigManifest {
    /// API version (must be "flowsmith/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DeployerConfig")
    pub kind: String,

    #[serde(default)]
    pub spec: DeployerConfigSpec,
}

/// Configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfigSpec {
    #[serde(default)]
    pub nifi: NifiConfig,

    #[serde(default)]
    pub deploy: DeploySettings,

    #[serde(default)]
    pub layout_check: LayoutCheckSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NifiConfig {
    /// REST API root, e.g. https://localhost:8443/nifi-api
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Pre-issued bearer token; takes precedence over username/password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_true")]
    pub verify_tls: bool,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Retry and stabilization budgets for one deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Controller service name (property key, API type or class name) -> live id
    #[serde(default)]
    pub controller_services: BTreeMap<String, String>,

    /// Clear the canvas root before building
    #[serde(default = "default_true")]
    pub purge_root: bool,

    /// Services ensured on the canvas root before every deployment
    #[serde(default)]
    pub root_services: Vec<RootServiceEntry>,
}

/// A shared controller service kept on the canvas root.
///
/// The entry's `key` joins the run's service map, so flow properties may name
/// it instead of a live id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootServiceEntry {
    pub key: String,

    pub name: String,

    #[serde(rename = "type")]
    pub service_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub auto_enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,

    /// Live id, when known; takes precedence over the name lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutCheckSettings {
    #[serde(default = "default_min_dx")]
    pub min_dx: f64,

    #[serde(default = "default_vertical_tolerance")]
    pub vertical_tolerance: f64,

    #[serde(default = "default_min_separation")]
    pub min_separation: f64,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://localhost:8443/nifi-api".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_min_dx() -> f64 {
    50.0
}

fn default_vertical_tolerance() -> f64 {
    15.0
}

fn default_min_separation() -> f64 {
    40.0
}

impl Default for NifiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: None,
            password: None,
            token: None,
            verify_tls: true,
            timeout: default_request_timeout(),
        }
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            poll_timeout: default_poll_timeout(),
            poll_interval: default_poll_interval(),
            controller_services: BTreeMap::new(),
            purge_root: true,
            root_services: Vec::new(),
        }
    }
}

impl Default for LayoutCheckSettings {
    fn default() -> Self {
        Self {
            min_dx: default_min_dx(),
            vertical_tolerance: default_vertical_tolerance(),
            min_separation: default_min_separation(),
        }
    }
}

impl Default for DeployerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            spec: DeployerConfigSpec::default(),
        }
    }
}

impl DeployerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. FLOWSMITH_CONFIG_PATH environment variable
    /// 2. ./flowsmith.yaml (working directory)
    /// 3. ~/.flowsmith/config.yaml (user home)
    /// 4. /etc/flowsmith/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLOWSMITH_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./flowsmith.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".flowsmith").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/flowsmith/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::debug!("No configuration file found in standard locations, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply NIFI_* environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        let nifi = &mut self.spec.nifi;

        if let Ok(val) = std::env::var("NIFI_BASE_URL") {
            tracing::info!("Environment override: NIFI_BASE_URL={}", val);
            nifi.base_url = val;
        }
        if let Ok(val) = std::env::var("NIFI_USERNAME") {
            tracing::info!("Environment override: NIFI_USERNAME={}", val);
            nifi.username = Some(val);
        }
        if let Ok(val) = std::env::var("NIFI_PASSWORD") {
            tracing::info!("Environment override: NIFI_PASSWORD=<redacted>");
            nifi.password = Some(val);
        }
        if let Ok(val) = std::env::var("NIFI_TOKEN") {
            tracing::info!("Environment override: NIFI_TOKEN=<redacted>");
            nifi.token = Some(val);
        }
        if let Ok(val) = std::env::var("NIFI_VERIFY_SSL") {
            match parse_bool(&val) {
                Some(flag) => {
                    tracing::info!("Environment override: NIFI_VERIFY_SSL={}", flag);
                    nifi.verify_tls = flag;
                }
                None => {
                    tracing::warn!(
                        "Invalid value for NIFI_VERIFY_SSL: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        let base_url = &self.spec.nifi.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!(
                "spec.nifi.base_url must start with http:// or https://, got '{}'",
                base_url
            );
        }

        if self.spec.nifi.password.is_some() && self.spec.nifi.username.is_none() {
            anyhow::bail!("spec.nifi.password is set without spec.nifi.username");
        }

        let deploy = &self.spec.deploy;
        if deploy.retry_attempts == 0 {
            anyhow::bail!("spec.deploy.retry_attempts must be at least 1");
        }
        if deploy.poll_timeout.is_zero() || deploy.poll_interval.is_zero() {
            anyhow::bail!("spec.deploy.poll_timeout and poll_interval must be non-zero");
        }

        for (name, id) in &deploy.controller_services {
            if id.trim().is_empty() {
                anyhow::bail!("Controller service '{}' maps to an empty id", name);
            }
        }

        let mut keys = std::collections::HashSet::new();
        for entry in &deploy.root_services {
            if entry.key.trim().is_empty() || entry.name.trim().is_empty() {
                anyhow::bail!("spec.deploy.root_services entries need a key and a name");
            }
            if entry.service_type.trim().is_empty() {
                anyhow::bail!("Root service '{}' has no type", entry.key);
            }
            if !keys.insert(entry.key.as_str()) {
                anyhow::bail!("Root service key '{}' is declared twice", entry.key);
            }
        }

        let check = &self.spec.layout_check;
        if check.min_dx < 0.0 || check.vertical_tolerance < 0.0 || check.min_separation < 0.0 {
            anyhow::bail!("spec.layout_check thresholds cannot be negative");
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
