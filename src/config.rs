use crate::binding::ItemBinding;
use crate::core::db::connection::{ServerDescriptor, DEFAULT_DRIVER, DEFAULT_SERVER_ID};
use crate::core::{BridgeError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

/// Refresh interval used when the configuration has no `refresh` key
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

static SERVER_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\.(url|user|password)$").expect("server key pattern is valid"));

/// Raw configuration file layout.
///
/// `[bridge]` holds flat properties (`url`, `user`, `password`, `refresh`,
/// `driver`, `<server>.url`, ...); `[items]` maps item names to binding text.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub bridge: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub items: BTreeMap<String, String>,
}

/// Resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Every server, the default one included
    pub servers: Vec<ServerDescriptor>,
    /// Interval handed to the host scheduler through [`crate::bridge::Bridge::refresh_interval`]
    pub refresh_interval: Duration,
    /// Driver identifier already applied to every descriptor in `servers`
    pub driver: String,
    pub items: BTreeMap<String, ItemBinding>,
}

impl BridgeConfig {
    /// Builds the server set from flat properties.
    ///
    /// `<id>.url`, `<id>.user` and `<id>.password` describe named servers;
    /// the unprefixed `url`, `user` and `password` describe the default one.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self> {
        if props.is_empty() {
            return Err(BridgeError::Config(
                "The SQL database URL is missing - please configure the url parameter".to_string(),
            ));
        }

        let driver = props
            .get("driver")
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DRIVER)
            .to_string();

        let mut servers: BTreeMap<String, ServerDescriptor> = BTreeMap::new();
        for (key, value) in props {
            let Some(caps) = SERVER_KEY_PATTERN.captures(key) else {
                continue;
            };
            let server_id = &caps[1];
            let server = servers.entry(server_id.to_string()).or_insert_with(|| {
                debug!("Created new DB server info {}", server_id);
                ServerDescriptor::new(server_id)
            });
            match &caps[2] {
                "url" => server.url = value.clone(),
                "user" => server.user = value.clone(),
                "password" => server.password = value.clone(),
                _ => {}
            }
        }

        let field = |key: &str| props.get(key).cloned().unwrap_or_default();
        let default = ServerDescriptor::new(DEFAULT_SERVER_ID)
            .with_url(field("url"))
            .with_credentials(field("user"), field("password"));
        servers.insert(DEFAULT_SERVER_ID.to_string(), default);

        let refresh_interval = match props.get("refresh").map(|r| r.trim()) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| BridgeError::Config(format!("invalid refresh '{}': {}", raw, e)))?,
            _ => DEFAULT_REFRESH_INTERVAL,
        };

        let servers = servers
            .into_values()
            .map(|server| server.with_driver(driver.clone()))
            .collect();

        Ok(BridgeConfig {
            servers,
            refresh_interval,
            driver,
            items: BTreeMap::new(),
        })
    }

    /// Adds item bindings; items whose binding text is invalid are logged
    /// and left out.
    pub fn with_items(mut self, items: &BTreeMap<String, String>) -> Self {
        for (name, text) in items {
            match ItemBinding::parse(text) {
                Ok(binding) => {
                    self.items.insert(name.clone(), binding);
                }
                Err(e) => error!("item {}: {}", name, e),
            }
        }
        self
    }

    pub fn server(&self, server_id: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.server_id == server_id)
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<BridgeConfig> {
    let file: ConfigFile = toml::from_str(content)?;

    let mut props = BTreeMap::new();
    for (key, value) in file.bridge {
        let text = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(BridgeError::Config(format!(
                    "key '{}' must be a scalar, found {}",
                    key,
                    other.type_str()
                )))
            }
        };
        props.insert(key, text);
    }

    Ok(BridgeConfig::from_properties(&props)?.with_items(&file.items))
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlbridge::config::load_config("bridge.toml").expect("Failed to load config");
/// println!("{:?}", config.servers);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// `<config dir>/sqlbridge/bridge.toml`, falling back to the working directory.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlbridge")
        .join("bridge.toml")
}
