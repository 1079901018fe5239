//! Session configuration
//!
//! A [`ClientConfig`] is read once from TOML, validated, and then handed out
//! as immutable values: [`SessionConfig`] to the connection manager,
//! subscriptions to the dispatcher and [`PublishSettings`] to the publisher.
//! Nothing downstream can mutate it, which is what keeps the last will fixed
//! once a session exists.

use crate::protocol::{
    validate_topic_filter, validate_topic_name, LastWill, Qos, Subscription, ValidationError,
};
use crate::session::publisher::PublishSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Root of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub session: SessionConfig,
    pub subscribe: SubscribeSection,
    #[serde(default)]
    pub publish: PublishSection,
    /// Caller-side reconnect policy; absent means no reconnection
    pub reconnect: Option<ReconnectPolicy>,
}

/// Connection parameters and will-message definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Broker host name, or an `mqtt://` / `mqtts://` URL
    pub broker_address: String,
    /// Explicit port; defaults to 1883, or 8883 with TLS
    pub port: Option<u16>,
    /// Client identifier, unique per broker at any given time
    #[serde(default = "generate_client_id")]
    pub client_id: String,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default)]
    pub tls: bool,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Capacity of the bounded outbound request queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    pub last_will: Option<LastWill>,
}

fn generate_client_id() -> String {
    format!("mqtt-session-{}", uuid::Uuid::new_v4().simple())
}

fn default_clean_session() -> bool {
    true
}

fn get_env_var_required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.to_string()))
}

fn default_keep_alive_secs() -> u16 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_outbound_capacity() -> usize {
    10
}

/// Resolved broker location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Subscription section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeSection {
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: Qos,
    /// Further filters subscribed alongside `topic`
    #[serde(default)]
    pub additional: Vec<Subscription>,
}

impl SubscribeSection {
    /// All configured subscriptions, primary topic first
    pub fn subscriptions(&self) -> Vec<Subscription> {
        std::iter::once(Subscription::new(self.topic.clone(), self.qos))
            .chain(self.additional.iter().cloned())
            .collect()
    }
}

/// Periodic publisher section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_publish_enabled")]
    pub enabled: bool,
    /// Publish topic; defaults to the subscribe topic
    pub topic: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: Qos,
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Supports `{seq}`, `{client_id}` and `{timestamp}` placeholders
    #[serde(default = "default_payload_template")]
    pub payload_template: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            enabled: default_publish_enabled(),
            topic: None,
            qos: default_qos(),
            retain: false,
            period_secs: default_period_secs(),
            payload_template: default_payload_template(),
        }
    }
}

fn default_qos() -> Qos {
    Qos::AtLeastOnce
}

fn default_publish_enabled() -> bool {
    true
}

fn default_period_secs() -> u64 {
    5
}

fn default_payload_template() -> String {
    "Hello from mqtt-session! Message #{seq}".to_string()
}

/// Explicit reconnect policy applied by the session lifecycle, never by the
/// connection manager itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay to use after pattern is exhausted
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![1_000, 2_000, 5_000]
}

fn default_sustained_delay_ms() -> u64 {
    10_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern_ms
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay_ms);
        Duration::from_millis(millis)
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn allows_attempt(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0, or omitted for unlimited"
                    .to_string(),
            ));
        }
        if self.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.sustained_delay_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("Invalid topic in {field}: {source}")]
    InvalidTopic {
        field: &'static str,
        #[source]
        source: ValidationError,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Configuration with defaults for everything except the broker and client ID
    pub fn new(broker_address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_address: broker_address.into(),
            port: None,
            client_id: client_id.into(),
            clean_session: default_clean_session(),
            keep_alive_secs: default_keep_alive_secs(),
            tls: false,
            username_env: None,
            password_env: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            outbound_capacity: default_outbound_capacity(),
            last_will: None,
        }
    }

    /// Attach the will at construction time
    pub fn with_last_will(mut self, will: LastWill) -> Self {
        self.last_will = Some(will);
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolve host, port and TLS from `broker_address`, `port` and `tls`
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let address = self.broker_address.trim();
        if address.is_empty() {
            return Err(ConfigError::InvalidBrokerAddress(
                "broker_address cannot be empty".to_string(),
            ));
        }

        let (host, url_port, scheme_tls) = if address.contains("://") {
            let url = Url::parse(address)
                .map_err(|_| ConfigError::InvalidBrokerAddress(address.to_string()))?;
            let tls = match url.scheme() {
                "mqtt" | "tcp" => false,
                "mqtts" | "ssl" => true,
                _ => return Err(ConfigError::InvalidBrokerAddress(address.to_string())),
            };
            let host = url
                .host_str()
                .filter(|host| !host.is_empty())
                .ok_or_else(|| ConfigError::InvalidBrokerAddress(address.to_string()))?;
            (host.to_string(), url.port(), tls)
        } else {
            (address.to_string(), None, false)
        };

        let tls = self.tls || scheme_tls;
        let port = self
            .port
            .or(url_port)
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(BrokerEndpoint { host, port, tls })
    }

    /// Username and password resolved from the configured environment variables
    ///
    /// A variable that is named in the config but unset is an error.
    pub fn credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let Some(username_env) = self.username_env.as_deref() else {
            return Ok(None);
        };
        let username = get_env_var_required(username_env)?;
        let password = match self.password_env.as_deref() {
            Some(name) => get_env_var_required(name)?,
            None => String::new(),
        };
        Ok(Some((username, password)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if self.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client_id cannot be empty".to_string(),
            ));
        }
        if self.client_id.starts_with(' ') {
            return Err(ConfigError::InvalidConfig(
                "client_id cannot start with a space".to_string(),
            ));
        }
        if (1..5).contains(&self.keep_alive_secs) {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be 0 (disabled) or at least 5, got {}",
                self.keep_alive_secs
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "outbound_capacity must be greater than 0".to_string(),
            ));
        }
        if let Some(will) = &self.last_will {
            validate_topic_name(&will.topic).map_err(|source| ConfigError::InvalidTopic {
                field: "session.last_will.topic",
                source,
            })?;
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;

        for subscription in self.subscribe.subscriptions() {
            validate_topic_filter(&subscription.topic).map_err(|source| {
                ConfigError::InvalidTopic {
                    field: "subscribe.topic",
                    source,
                }
            })?;
        }

        validate_topic_name(self.publish_topic()).map_err(|source| ConfigError::InvalidTopic {
            field: "publish.topic",
            source,
        })?;

        if self.publish.period_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.period_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(policy) = &self.reconnect {
            policy.validate()?;
        }

        Ok(())
    }

    /// Topic the publisher writes to
    pub fn publish_topic(&self) -> &str {
        self.publish
            .topic
            .as_deref()
            .unwrap_or(self.subscribe.topic.as_str())
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            topic: self.publish_topic().to_string(),
            qos: self.publish.qos,
            retain: self.publish.retain,
            period: Duration::from_secs(self.publish.period_secs),
            payload_template: self.publish.payload_template.clone(),
            client_id: self.session.client_id.clone(),
        }
    }

    /// Configuration mirroring the defaults of the reference deployment
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[session]
broker_address = "localhost"
client_id = "client-123"

[session.last_will]
topic = "clients/client-123/status"
payload = "Client '{client_id}' has disconnected unexpectedly."
qos = 2
retain = true

[subscribe]
topic = "test 10"
qos = 1
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
