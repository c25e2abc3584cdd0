//! Device configuration.
//!
//! Loaded from a JSON file; every field has a default. The publisher token
//! can be supplied through `TELEMETRY_AUTH_TOKEN` instead of the file.

use crate::runtime::RuntimeSettings;
use crate::transport::Topic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_core::witness::MESSAGE_LEN;
use telemetry_core::{
    AttestationMode, AttestorSettings, DeviceId, KeyError, KeySource, Layout, VehicleClass,
    WireEncoding, DEFAULT_EVENT_TYPE,
};
use thiserror::Error;

/// Environment variable overriding [`DeviceConfig::auth_token`].
pub const AUTH_TOKEN_ENV: &str = "TELEMETRY_AUTH_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid key source: {0}")]
    Key(#[from] KeyError),
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for ConnAck and PubAck
    pub ack_timeout_ms: u64,
}

impl BrokerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "telemetry-device".to_string(),
            keep_alive_secs: 30,
            ack_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Project owner address, e.g. `0x8ef5…`
    pub chain_address: String,
    pub stream: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Overrides the IMEI reported by the GPS receiver
    pub device_id: Option<String>,
    pub vehicle: VehicleClass,
    #[serde(skip_serializing)]
    pub key_source: KeySource,
    pub broker: BrokerConfig,
    pub topic: TopicConfig,
    #[serde(skip_serializing)]
    pub auth_token: String,
    pub event_type: String,
    pub mode: AttestationMode,
    pub layout: Layout,
    pub wire_encoding: WireEncoding,
    pub location_refresh_secs: u64,
    /// `0` disables periodic publishing
    pub publish_interval_secs: u64,
    pub session_deadline_secs: u64,
    pub attempts_per_publish: u32,
    /// Publish once more after the session ends
    pub final_publish: bool,
    pub location_file: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            vehicle: VehicleClass::Bike,
            key_source: KeySource::default(),
            broker: BrokerConfig::default(),
            topic: TopicConfig::default(),
            auth_token: String::new(),
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            mode: AttestationMode::default(),
            layout: Layout::trip(),
            wire_encoding: WireEncoding::default(),
            location_refresh_secs: 10,
            publish_interval_secs: 10,
            session_deadline_secs: 600,
            attempts_per_publish: 1,
            final_publish: true,
            location_file: PathBuf::from("gps.json"),
        }
    }
}

impl DeviceConfig {
    /// Read, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(AUTH_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.auth_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.auth_token.is_empty() {
            return invalid("auth_token is empty (set it or TELEMETRY_AUTH_TOKEN)");
        }
        if self.event_type.is_empty() {
            return invalid("event_type is empty");
        }
        if self.device_id.as_deref() == Some("") {
            return invalid("device_id is empty");
        }
        if self.location_refresh_secs == 0 {
            return invalid("location_refresh_secs must be at least 1");
        }
        if self.session_deadline_secs == 0 {
            return invalid("session_deadline_secs must be at least 1");
        }
        if self.attempts_per_publish == 0 {
            return invalid("attempts_per_publish must be at least 1");
        }
        if self.broker.host.is_empty() || self.broker.client_id.is_empty() {
            return invalid("broker host and client_id are required");
        }
        if self.broker.keep_alive_secs == 0 || self.broker.ack_timeout_ms == 0 {
            return invalid("broker keep_alive_secs and ack_timeout_ms must be positive");
        }
        if self.mode == AttestationMode::Layout && self.layout.encoded_len() != MESSAGE_LEN {
            return Err(ConfigError::Invalid(format!(
                "layout encodes {} bytes, the circuit takes {}",
                self.layout.encoded_len(),
                MESSAGE_LEN
            )));
        }
        self.topic()?;
        self.key_source.provider()?;
        Ok(())
    }

    pub fn topic(&self) -> Result<Topic, ConfigError> {
        Topic::new(&self.topic.chain_address, &self.topic.stream)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.device_id.clone().map(DeviceId)
    }

    pub fn runtime_settings(&self) -> Result<RuntimeSettings, ConfigError> {
        let mut attestor = AttestorSettings::new(self.vehicle, self.auth_token.clone());
        attestor.mode = self.mode;
        attestor.event_type = self.event_type.clone();

        Ok(RuntimeSettings {
            location_refresh: Duration::from_secs(self.location_refresh_secs),
            publish_interval: (self.publish_interval_secs > 0)
                .then(|| Duration::from_secs(self.publish_interval_secs)),
            session_deadline: Duration::from_secs(self.session_deadline_secs),
            attempts_per_publish: self.attempts_per_publish,
            final_publish: self.final_publish,
            wire_encoding: self.wire_encoding,
            topic: self.topic()?,
            layout: self.layout.clone(),
            attestor,
        })
    }
}
