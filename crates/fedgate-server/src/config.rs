//! Server configuration

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub oauth: OauthSettings,
    pub resources: ResourceSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct OauthSettings {
    /// External issuer URL of this broker
    pub issuer: String,
    /// Name of the FederationDomain this endpoint serves
    pub federation_domain: String,
    /// Base64-encoded 256-bit key sealing state envelopes and codes
    pub state_encryption_key: String,
    #[serde(default)]
    pub clients: Vec<ClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct ClientSettings {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceSettings {
    /// Path to the JSON document declaring providers and domains
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval(),
            discovery_timeout_secs: default_discovery_timeout(),
            dial_timeout_secs: default_dial_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_resync_interval() -> u64 {
    180
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    250
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("resources.file", "config/resources.json")?
            // Load from config file if present
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Load from environment variables with FEDGATE_ prefix
            .add_source(
                config::Environment::with_prefix("FEDGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
