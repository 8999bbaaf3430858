//! Session configuration and broker address parsing

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::MqttError;

const CONFIG_DIR: &str = ".config/mqtt-relay";
const CONFIG_FILE: &str = "mqtt.toml";
const CLIENT_ID_PREFIX: &str = "mqtt_relay_";
const DEFAULT_PORT: u16 = 1883;

/// Options accepted by [`MqttSession::init`](crate::MqttSession::init)
///
/// Everything except `broker_url` has a default, so a TOML file only needs
/// the broker:
///
/// ```toml
/// broker_url = "mqtt://localhost:1883"
/// is_debug = true
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttConfig {
    /// Broker endpoint, `mqtt://host:port`, `tcp://host:port` or `host:port`
    pub broker_url: String,

    /// Enables the session's debug log output
    #[serde(default)]
    pub is_debug: bool,

    /// Overrides the generated client identifier
    #[serde(default)]
    pub client_id: Option<String>,

    /// Start a clean session on every connect
    #[serde(default = "default_clean")]
    pub clean: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pause between a dropped connection and the next attempt
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Capacity of the client's request channel
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_clean() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_period_ms() -> u64 {
    1000
}

fn default_request_capacity() -> usize {
    100
}

impl MqttConfig {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            is_debug: false,
            client_id: None,
            clean: default_clean(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_period_ms: default_reconnect_period_ms(),
            username: None,
            password: None,
            request_capacity: default_request_capacity(),
        }
    }

    pub fn with_debug(mut self, is_debug: bool) -> Self {
        self.is_debug = is_debug;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, MqttError> {
        let config: MqttConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, MqttError> {
        let path = path.as_ref();
        debug!("Loading MQTT config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded MQTT config for broker {}", config.broker_url);
        Ok(config)
    }

    /// Loads `~/.config/mqtt-relay/mqtt.toml`
    pub async fn load_default() -> Result<Self, MqttError> {
        Self::load(default_config_path()).await
    }

    pub fn validate(&self) -> Result<(), MqttError> {
        BrokerAddress::parse(&self.broker_url)?;
        if self.request_capacity == 0 {
            return Err(MqttError::Config(
                "request_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Connect timeout rounded up to whole seconds, the client's resolution
    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_ms.div_ceil(1000).max(1)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }
}

/// Location of the default config file under the user's home directory
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        debug!("No home directory found, using working directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

/// Client identifier built from the current time and a random suffix
///
/// Unique enough for a handful of processes sharing a broker, not guaranteed.
pub fn generate_client_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let jitter: f64 = rand::thread_rng().gen_range(0.0..100.0);
    format!("{}{}{}", CLIENT_ID_PREFIX, millis, jitter)
}

/// Host and port extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn parse(url: &str) -> Result<Self, MqttError> {
        let url = url.trim();
        let rest = match url.split_once("://") {
            Some(("mqtt", rest)) | Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(MqttError::Config(format!(
                    "Unsupported broker scheme: {}",
                    scheme
                )))
            }
            None => url,
        };

        // drop any path or query part
        let authority = rest.split(|c: char| c == '/' || c == '?').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(MqttError::Config(format!("Missing broker host in {:?}", url)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    MqttError::Config(format!("Invalid broker port {:?}: {}", port, e))
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(MqttError::Config(format!("Missing broker host in {:?}", url)));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_broker_urls() {
        let addr = BrokerAddress::parse("mqtt://broker.local:1884").unwrap();
        assert_eq!(addr.host, "broker.local");
        assert_eq!(addr.port, 1884);

        let addr = BrokerAddress::parse("tcp://10.0.0.2").unwrap();
        assert_eq!(addr.port, 1883);

        let addr = BrokerAddress::parse("localhost:2000").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 2000);

        let addr = BrokerAddress::parse("mqtt://test/some/path").unwrap();
        assert_eq!(addr.host, "test");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn rejects_unsupported_or_broken_urls() {
        assert!(matches!(
            BrokerAddress::parse("ws://broker:8080"),
            Err(MqttError::Config(_))
        ));
        assert!(BrokerAddress::parse("mqtt://").is_err());
        assert!(BrokerAddress::parse("mqtt://host:notaport").is_err());
        assert!(BrokerAddress::parse(":1883").is_err());
    }

    #[test]
    fn toml_applies_defaults() {
        let config = MqttConfig::from_toml_str(r#"broker_url = "mqtt://test""#).unwrap();
        assert_eq!(config, MqttConfig::new("mqtt://test"));
        assert!(config.clean);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert!(!config.is_debug);
        assert_eq!(config.client_id, None);
    }

    #[test]
    fn toml_overrides() {
        let config = MqttConfig::from_toml_str(
            r#"
            broker_url = "mqtt://test:1999"
            is_debug = true
            client_id = "fixed"
            clean = false
            connect_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert!(config.is_debug);
        assert_eq!(config.client_id.as_deref(), Some("fixed"));
        assert!(!config.clean);
        assert_eq!(config.connect_timeout_secs(), 2);
    }

    #[test]
    fn toml_without_broker_is_rejected() {
        assert!(matches!(
            MqttConfig::from_toml_str("is_debug = true"),
            Err(MqttError::Toml(_))
        ));
    }

    #[test]
    fn generated_client_ids_carry_prefix() {
        let id = generate_client_id();
        assert!(id.starts_with(CLIENT_ID_PREFIX));
        assert!(id.len() > CLIENT_ID_PREFIX.len() + 10);
    }

    #[test]
    fn default_path_ends_in_config_file() {
        assert!(default_config_path().ends_with("mqtt-relay/mqtt.toml"));
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let mut path = std::env::temp_dir();
        path.push(format!("mqtt-relay-{}.toml", generate_client_id()));
        tokio::fs::write(&path, "broker_url = \"tcp://127.0.0.1:1883\"\n")
            .await
            .unwrap();

        let config = MqttConfig::load(&path).await.unwrap();
        assert_eq!(config.broker_url, "tcp://127.0.0.1:1883");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
