//! Configuration for the agent console.

use std::env;
use std::time::Duration;

use chat_sync::DashboardConfig;
use chat_transport::ServerConfig;
use thiserror::Error;

/// Errors reading console configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration for the agent console.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Real-time endpoint base URL.
    pub socket_url: String,
    /// REST API base URL.
    pub api_url: String,
    pub agent_id: String,
    pub agent_name: String,
    /// Conversation opened on startup, if any.
    pub conversation: Option<String>,
    pub require_open_ticket: bool,
    pub request_timeout: Duration,
}

impl ConsoleConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `CHAT_SOCKET_URL`
    ///
    /// Optional env vars:
    /// - `CHAT_API_URL` (default: `{CHAT_SOCKET_URL}/api`)
    /// - `AGENT_ID` (default: 1)
    /// - `AGENT_NAME` (default: Admin User)
    /// - `CHAT_CONVERSATION`
    /// - `CHAT_REQUIRE_OPEN_TICKET` (default: false)
    /// - `CHAT_REQUEST_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let socket_url = lookup("CHAT_SOCKET_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("CHAT_SOCKET_URL"))?;
        let api_url = lookup("CHAT_API_URL")
            .unwrap_or_else(|| format!("{}/api", socket_url.trim_end_matches('/')));

        let require_open_ticket = match lookup("CHAT_REQUIRE_OPEN_TICKET") {
            Some(value) => parse_flag("CHAT_REQUIRE_OPEN_TICKET", &value)?,
            None => false,
        };
        let request_timeout = match lookup("CHAT_REQUEST_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    name: "CHAT_REQUEST_TIMEOUT_SECS",
                    value,
                })?,
            None => chat_transport::DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            socket_url,
            api_url,
            agent_id: lookup("AGENT_ID").unwrap_or_else(|| "1".to_string()),
            agent_name: lookup("AGENT_NAME").unwrap_or_else(|| "Admin User".to_string()),
            conversation: lookup("CHAT_CONVERSATION").filter(|v| !v.trim().is_empty()),
            require_open_ticket,
            request_timeout,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(&self.socket_url, &self.api_url)
            .with_client_id(format!("agent-{}", self.agent_id))
            .with_request_timeout(self.request_timeout)
    }

    pub fn dashboard_config(&self) -> DashboardConfig {
        let mut config = DashboardConfig::new(&self.agent_id, &self.agent_name);
        config.require_open_ticket = self.require_open_ticket;
        config
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
