//! # Configuration Management
//!
//! Centralized configuration for the relay.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - `PACKET_RELAY_*` environment overrides via `from_env()`
//!
//! ## Example
//! ```toml
//! [[listeners]]
//! name = "login"
//! listen_address = "127.0.0.1:6600"
//! remote_address = "203.0.113.10:6600"
//!
//! [schema]
//! path = "data/schema.toml"
//!
//! [keystream]
//! directory = "data/keystream"
//! initial_table = 1
//!
//! [redirect]
//! login_listener = "login"
//! worlds = [
//!     { field = "worldIP1", local_address = "127.0.0.1:6610" },
//!     { field = "worldIP2", local_address = "127.0.0.1:6611" },
//! ]
//! ```

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::Level;

/// Suffix appended to every server name in the login server list
pub const DEFAULT_SERVER_NAME_SUFFIX: &str = "(Proxy)";

/// Main relay configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Listeners started at boot
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub keystream: KeystreamConfig,

    #[serde(default)]
    pub redirect: RedirectConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with `PACKET_RELAY_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `PACKET_RELAY_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("PACKET_RELAY_SCHEMA_PATH") {
            self.schema.path = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("PACKET_RELAY_KEYSTREAM_DIR") {
            self.keystream.directory = PathBuf::from(dir);
        }

        if let Ok(version) = std::env::var("PACKET_RELAY_KEYSTREAM_TABLE") {
            if let Ok(val) = version.parse::<u32>() {
                self.keystream.table_version = Some(val);
            }
        }

        if let Ok(level) = std::env::var("PACKET_RELAY_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                self.logging.log_level = val;
            }
        }

        // single-listener shorthand: PACKET_RELAY_LISTEN + PACKET_RELAY_REMOTE
        if let (Ok(listen), Ok(remote)) = (
            std::env::var("PACKET_RELAY_LISTEN"),
            std::env::var("PACKET_RELAY_REMOTE"),
        ) {
            self.listeners = vec![ListenerConfig::new("login", listen, remote)];
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        let example = Self::default_with_overrides(|c| {
            c.listeners = vec![ListenerConfig::new(
                "login",
                "127.0.0.1:6600",
                "203.0.113.10:6600",
            )];
            c.redirect.login_listener = Some("login".to_string());
            c.redirect.worlds = vec![
                WorldRoute::new("worldIP1", "127.0.0.1:6610"),
                WorldRoute::new("worldIP2", "127.0.0.1:6611"),
            ];
        });
        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerConfig> {
        self.listeners.iter().find(|l| l.name == name)
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listeners.is_empty() {
            errors.push("At least one listener must be configured".to_string());
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for listener in &self.listeners {
            errors.extend(listener.validate());
            if !names.insert(listener.name.as_str()) {
                errors.push(format!("Duplicate listener name: '{}'", listener.name));
            }
            if !addresses.insert(listener.listen_address.as_str()) {
                errors.push(format!(
                    "Duplicate listen address: '{}'",
                    listener.listen_address
                ));
            }
        }

        errors.extend(self.schema.validate());
        errors.extend(self.keystream.validate());
        errors.extend(self.redirect.validate());

        if let Some(ref login) = self.redirect.login_listener {
            if self.listener(login).is_none() {
                errors.push(format!("Redirect login listener '{login}' is not configured"));
            }
        }

        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn check_address(errors: &mut Vec<String>, what: &str, address: &str) {
    if address.is_empty() {
        errors.push(format!("{what} cannot be empty"));
    } else if address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {what} format: '{address}' (expected format: '127.0.0.1:8080')"
        ));
    }
}

/// One local listener and the real server it relays to
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Name used in logs (e.g. "login", "world1")
    pub name: String,

    /// Local address clients connect to
    pub listen_address: String,

    /// Real server address
    pub remote_address: String,
}

impl ListenerConfig {
    pub fn new(
        name: impl Into<String>,
        listen_address: impl Into<String>,
        remote_address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen_address: listen_address.into(),
            remote_address: remote_address.into(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("Listener name cannot be empty".to_string());
        }
        check_address(&mut errors, "listen address", &self.listen_address);
        // remote may be a host name; only require host:port shape
        if self.remote_address.rsplit_once(':').is_none() {
            errors.push(format!(
                "Invalid remote address format: '{}' (expected format: 'host:port')",
                self.remote_address
            ));
        }

        errors
    }
}

/// Schema bundle location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// TOML schema bundle with opcode maps and message definitions
    pub path: PathBuf,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/schema.toml"),
        }
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push("Schema path cannot be empty".to_string());
        }
        errors
    }
}

/// Keystream table selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeystreamConfig {
    /// Directory holding `<table_version>.xor` files
    pub directory: PathBuf,

    /// Table loaded at startup, before any version is detected
    #[serde(default)]
    pub initial_table: Option<u32>,

    /// Pins the table id instead of following the detected protocol version
    #[serde(default)]
    pub table_version: Option<u32>,
}

impl Default for KeystreamConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/keystream"),
            initial_table: None,
            table_version: None,
        }
    }
}

impl KeystreamConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.directory.as_os_str().is_empty() {
            errors.push("Keystream directory cannot be empty".to_string());
        }
        errors
    }
}

/// Local endpoint substituted for one world address field of `S_SELECT_WORLD`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorldRoute {
    /// Event field holding a `host:port` string
    pub field: String,

    /// Address clients are sent to instead
    pub local_address: String,
}

impl WorldRoute {
    pub fn new(field: impl Into<String>, local_address: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            local_address: local_address.into(),
        }
    }
}

/// Login redirect behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Listener whose traffic gets the login redirect handler
    #[serde(default)]
    pub login_listener: Option<String>,

    /// Appended to every server name of the server list
    pub server_name_suffix: String,

    #[serde(default)]
    pub worlds: Vec<WorldRoute>,

    /// Start a world listener for each redirected endpoint
    pub spawn_world_listeners: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            login_listener: None,
            server_name_suffix: DEFAULT_SERVER_NAME_SUFFIX.to_string(),
            worlds: Vec::new(),
            spawn_world_listeners: true,
        }
    }
}

impl RedirectConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut fields = HashSet::new();
        for route in &self.worlds {
            if route.field.is_empty() {
                errors.push("World route field cannot be empty".to_string());
            }
            if !fields.insert(route.field.as_str()) {
                errors.push(format!("Duplicate world route field: '{}'", route.field));
            }
            check_address(&mut errors, "world local address", &route.local_address);
        }

        if !self.worlds.is_empty() && self.login_listener.is_none() {
            errors.push("World routes require redirect.login_listener".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-relay"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
