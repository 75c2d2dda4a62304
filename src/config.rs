//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `FLIPFLEET_CONFIG`) into
//! strongly-typed sections. Every field has a default, so an empty file is a
//! valid single-agent paper-trading setup.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coord::http::HttpSettings;
use crate::engine::executor::ExecutionSettings;
use crate::engine::pacing::PacingSettings;
use crate::engine::probe::PollSettings;
use crate::engine::retry::RetryPolicy;
use crate::engine::rotation::RotationSettings;
use crate::engine::{MachineConfig, TradingSettings};
use crate::strategy::KellyConfig;

pub const CONFIG_ENV: &str = "FLIPFLEET_CONFIG";
pub const AGENT_ID_ENV: &str = "FLIPFLEET_AGENT_ID";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub trading: TradingSettings,
    pub kelly: KellyConfig,
    pub execution: ExecutionSettings,
    pub rotation: RotationSettings,
    pub probe: PollSettings,
    pub retry: RetryConfig,
    pub coordinator: CoordinatorConfig,
    pub pacing: PacingSettings,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Fleet-wide identity. Falls back to `FLIPFLEET_AGENT_ID`, then a
    /// generated id.
    pub id: Option<String>,
    /// Seed for the agent's random generator. Derived from the id if unset.
    pub seed: Option<u64>,
    /// Where limit snapshots are kept.
    pub data_dir: PathBuf,
    /// JSON array of catalog rows.
    pub catalog_path: PathBuf,
    /// Poll interval for catalog hot reload; 0 disables it.
    pub catalog_reload_secs: u64,
    /// Paper venue slots for dry runs.
    pub paper_slots: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: None,
            seed: None,
            data_dir: PathBuf::from("data"),
            catalog_path: PathBuf::from("catalog.json"),
            catalog_reload_secs: 60,
            paper_slots: 8,
        }
    }
}

/// Retry policies for the buy and sell loops.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub buy: RetrySettings,
    pub sell: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            buy: RetrySettings::from(&RetryPolicy::buys()),
            sell: RetrySettings::from(&RetryPolicy::sells()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_step_ms: u64,
    pub jitter_ms: u64,
    pub nudge_pct: f64,
    pub nudge_probability: f64,
    pub nudge_after: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::buys())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(p: &RetryPolicy) -> Self {
        Self {
            max_attempts: p.max_attempts,
            delay_step_ms: p.delay_step.as_millis() as u64,
            jitter_ms: p.jitter.as_millis() as u64,
            nudge_pct: p.nudge_pct,
            nudge_probability: p.nudge_probability,
            nudge_after: p.nudge_after,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay_step: Duration::from_millis(self.delay_step_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            nudge_pct: self.nudge_pct,
            nudge_probability: self.nudge_probability,
            nudge_after: self.nudge_after,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Single agent, no fleet.
    #[default]
    Disabled,
    Http,
    File,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub transport: TransportKind,
    pub url: String,
    pub timeout_secs: u64,
    pub report_attempts: u32,
    pub failure_threshold: u32,
    pub reprobe_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Shared document for the file transport.
    pub document_path: PathBuf,
    pub cache_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            transport: TransportKind::Disabled,
            url: http.base_url,
            timeout_secs: http.timeout.as_secs(),
            report_attempts: http.report_attempts,
            failure_threshold: http.failure_threshold,
            reprobe_secs: http.reprobe_interval.as_secs(),
            backoff_initial_ms: http.backoff_initial.as_millis() as u64,
            backoff_max_ms: http.backoff_max.as_millis() as u64,
            document_path: PathBuf::from("shared/limits.json"),
            cache_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            base_url: self.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.timeout_secs),
            report_attempts: self.report_attempts,
            failure_threshold: self.failure_threshold,
            reprobe_interval: Duration::from_secs(self.reprobe_secs),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load from `FLIPFLEET_CONFIG` or `config.toml`. A missing default file
    /// yields the built-in defaults; a missing explicit file is an error.
    pub fn load_default() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Reject settings that cannot produce a working agent.
    pub fn validate(&self) -> Result<()> {
        if self.trading.slot_ceiling == 0 {
            bail!("trading.slot_ceiling must be at least 1");
        }
        if self.trading.bankroll <= 0 {
            bail!("trading.bankroll must be positive");
        }
        if !(self.kelly.multiplier > 0.0 && self.kelly.multiplier <= 1.0) {
            bail!("kelly.multiplier must be in (0, 1], got {}", self.kelly.multiplier);
        }
        if self.execution.per_request_cap == 0 {
            bail!("execution.per_request_cap must be at least 1");
        }
        if self.probe.max_polls == 0 {
            bail!("probe.max_polls must be at least 1");
        }
        if self.retry.buy.max_attempts == 0 || self.retry.sell.max_attempts == 0 {
            bail!("retry max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.pacing.break_chance) {
            bail!("pacing.break_chance must be in [0, 1]");
        }
        if let Some(id) = &self.agent.id {
            if id.trim().is_empty() {
                bail!("agent.id must not be empty");
            }
        }
        Ok(())
    }

    /// Agent identity: config, then environment, then a fresh uuid.
    pub fn resolve_agent_id(&self) -> String {
        let from_env = std::env::var(AGENT_ID_ENV).ok();
        resolve_agent_id(self.agent.id.as_deref(), from_env.as_deref())
    }

    /// Seed for the agent generator.
    pub fn seed_for(&self, agent_id: &str) -> u64 {
        self.agent.seed.unwrap_or_else(|| seed_from_id(agent_id))
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            trading: self.trading.clone(),
            kelly: self.kelly.clone(),
            execution: self.execution.clone(),
            poll: self.probe.clone(),
            pacing: self.pacing.clone(),
            rotation: self.rotation.clone(),
            buy_retry: self.retry.buy.policy(),
            sell_retry: self.retry.sell.policy(),
        }
    }
}

fn resolve_agent_id(configured: Option<&str>, from_env: Option<&str>) -> String {
    configured
        .or(from_env)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("agent-{}", uuid::Uuid::new_v4().simple()))
}

/// FNV-1a over the id bytes.
fn seed_from_id(agent_id: &str) -> u64 {
    agent_id.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
