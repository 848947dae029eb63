use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TIMEZONE: &str = "Asia/Almaty";
pub const DEFAULT_BEAT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BROKER_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_PREVIEW_LIMIT: usize = 20;

pub const WORKFLOW_TASK: &str = "worker.run_workflow";
pub const SCENARIO_TASK: &str = "worker.run_scenario";
pub const SCHEDULER_TASK: &str = "mainserver.run_workflow_schedules";

pub const WORKFLOWS_QUEUE: &str = "workflows";
pub const SCENARIOS_QUEUE: &str = "scenarios";
pub const DEFAULT_QUEUE: &str = "default";

/// Top-level config (wellcast.toml + WELLCAST_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WellcastConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: Some("change-me".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` on every administrative route.
    Token,
    /// No authentication (use only behind a trusted proxy).
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which broker backend the gateway talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    Redis,
    /// In-process queues; single-node setups and tests.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Upper bound for every single broker round-trip.
    #[serde(default = "default_broker_timeout_ms")]
    pub timeout_ms: u64,
    /// How long a worker ping broadcast waits for replies.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Pub/sub channel workers listen on for control commands (ping, revoke).
    #[serde(default = "default_control_channel")]
    pub control_channel: String,
    /// Queue used for task names that have no explicit route.
    #[serde(default = "default_queue")]
    pub default_queue: String,
    /// Task name -> queue name.
    #[serde(default = "default_routes")]
    pub routes: BTreeMap<String, String>,
    /// Queues reported by the workers-status endpoint.
    #[serde(default = "default_tracked_queues")]
    pub queues: Vec<String>,
    /// Max pending messages previewed per queue.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            url: default_broker_url(),
            timeout_ms: DEFAULT_BROKER_TIMEOUT_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            control_channel: default_control_channel(),
            default_queue: default_queue(),
            routes: default_routes(),
            queues: default_tracked_queues(),
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone cron expressions are evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Run the in-process beat loop alongside the HTTP server.
    #[serde(default = "bool_true")]
    pub beat_enabled: bool,
    #[serde(default = "default_beat_interval_secs")]
    pub beat_interval_secs: u64,
    /// Task name dispatched for every due schedule.
    #[serde(default = "default_workflow_task")]
    pub workflow_task: String,
    /// Skip dispatch (and log NO_SERVER) when no active server accepts workflows.
    #[serde(default)]
    pub require_workflow_server: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            beat_enabled: true,
            beat_interval_secs: DEFAULT_BEAT_INTERVAL_SECS,
            workflow_task: default_workflow_task(),
            require_workflow_server: false,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.wellcast/wellcast.db", home)
}
fn default_broker_kind() -> BrokerKind {
    BrokerKind::Redis
}
fn default_broker_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn default_broker_timeout_ms() -> u64 {
    DEFAULT_BROKER_TIMEOUT_MS
}
fn default_ping_timeout_ms() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}
fn default_control_channel() -> String {
    "wellcast.control".to_string()
}
fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}
fn default_routes() -> BTreeMap<String, String> {
    BTreeMap::from([
        (SCENARIO_TASK.to_string(), SCENARIOS_QUEUE.to_string()),
        (WORKFLOW_TASK.to_string(), WORKFLOWS_QUEUE.to_string()),
        (SCHEDULER_TASK.to_string(), DEFAULT_QUEUE.to_string()),
    ])
}
fn default_tracked_queues() -> Vec<String> {
    vec![SCENARIOS_QUEUE.to_string(), WORKFLOWS_QUEUE.to_string()]
}
fn default_preview_limit() -> usize {
    DEFAULT_PREVIEW_LIMIT
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_beat_interval_secs() -> u64 {
    DEFAULT_BEAT_INTERVAL_SECS
}
fn default_workflow_task() -> String {
    WORKFLOW_TASK.to_string()
}

impl WellcastConfig {
    /// Load config from a TOML file with WELLCAST_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `WELLCAST_SCHEDULER__BEAT_INTERVAL_SECS=30`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: WellcastConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WELLCAST_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.wellcast/wellcast.toml", home)
}
