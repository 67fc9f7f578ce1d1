//! Settings schema. Every struct is `#[serde(default)]` so a partial user
//! file only has to name the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Deployment environment. Dev-only routes are mounted outside production.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    pub name: String,
    pub environment: Environment,
    pub host: HostSettings,
    pub client: ClientSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
    pub auth: AuthSettings,
}

impl Default for SwitchboardSettings {
    fn default() -> Self {
        Self {
            name: "switchboard".to_string(),
            environment: Environment::default(),
            host: HostSettings::default(),
            client: ClientSettings::default(),
            agent: AgentSettings::default(),
            logging: LoggingSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl SwitchboardSettings {
    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(SettingsError::InvalidValue(
                "agent.maxIterations must be at least 1".into(),
            ));
        }
        let non_zero = [
            ("host.idleTimeoutSecs", self.host.idle_timeout_secs),
            ("host.heartbeatSecs", self.host.heartbeat_secs),
            ("host.toolTimeoutMs", self.host.tool_timeout_ms),
            ("client.connectTimeoutMs", self.client.connect_timeout_ms),
            ("client.requestTimeoutMs", self.client.request_timeout_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be non-zero")));
            }
        }
        if self.host.send_queue == 0 {
            return Err(SettingsError::InvalidValue("host.sendQueue must be non-zero".into()));
        }
        Ok(())
    }
}

/// Tool host network and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    /// Bind address.
    pub bind: String,
    pub port: u16,
    /// Session inactivity budget.
    pub idle_timeout_secs: u64,
    /// Interval between keep-alive comments on the stream.
    pub heartbeat_secs: u64,
    /// Per-call tool execution limit.
    pub tool_timeout_ms: u64,
    /// Outbound frame queue depth per session.
    pub send_queue: usize,
    /// JSON fixture for the customer directory. Built-in demo data when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            idle_timeout_secs: 1800,
            heartbeat_secs: 15,
            tool_timeout_ms: 30_000,
            send_queue: 64,
            data_file: None,
        }
    }
}

impl HostSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Orchestrator-side connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Ceiling on model round-trips per run.
    pub max_iterations: u32,
    pub model: String,
    pub model_base_url: String,
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            model: "gemini-2.0-flash".to_string(),
            model_base_url: "https://generativelanguage.googleapis.com".to_string(),
            system_prompt: "You are a customer operations assistant. Use the available tools to \
                            look up customers, orders and support tickets before answering."
                .to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Credentials. Kept as plain strings here; callers wrap them before use.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared secret between orchestrator and tool host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_api_key: Option<String>,
}
