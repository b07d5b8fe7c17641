//! Configuration for the duel relay.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config` or `DUEL_RELAY_CONFIG`),
//! 3. environment variables:
//!    - `DUEL_BIND_ADDR`      (default: "0.0.0.0")
//!    - `DUEL_TCP_PORT`       (default: "8911")
//!    - `DUEL_WS_PORT`        (default: "8913")
//!    - `DUEL_LOBBY_PORT`     (default: "24555")
//!    - `DUEL_MAX_CLIENTS`    (default: "1024")
//!    - `DUEL_PORT_MIN`       (default: "7000")
//!    - `DUEL_PORT_MAX`       (default: "8900", exclusive)
//!    - `DUEL_ENGINE_PROGRAM` (default: "./YGOServer.exe")
//!    - `DUEL_ENGINE_DIR`     (default: "ygocore")
//!    - `DUEL_LOG_LEVEL`      (default: "info")
//! 4. command-line flags (see `main.rs`).
//!
//! Call [`Config::validate`] once all layers are applied.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use duel_core::PortAllocator;

use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "DUEL_RELAY_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub ports: PortRange,
    pub engine: EngineConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// Listen endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// Raw engine protocol over TCP.
    pub tcp_port: u16,

    /// Engine protocol over WebSocket binary messages.
    pub ws_port: u16,

    /// Lobby directory channel (WebSocket, JSON).
    pub lobby_port: u16,

    /// Maximum simultaneously connected clients, per listener.
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0".to_string(),
            tcp_port: 8911,
            ws_port: 8913,
            lobby_port: 24555,
            max_clients: 1024,
        }
    }
}

/// Engine port pool, `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange { min: 7000, max: 8900 }
    }
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port < self.max
    }
}

/// How to run one engine process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable. Relative paths resolve against `working_dir`.
    pub program: PathBuf,

    /// Arguments placed before `<port> <config file>`.
    pub args: Vec<String>,

    /// Working directory of the engine (its install directory).
    pub working_dir: PathBuf,

    /// How long a new engine may take to print its ready marker.
    pub ready_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            program: PathBuf::from("./YGOServer.exe"),
            args: Vec::new(),
            working_dir: PathBuf::from("ygocore"),
            ready_timeout_ms: 15_000,
        }
    }
}

impl EngineConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Client bytes held per connection while its engine is starting.
    pub max_pending_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            max_pending_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Defaults, then the config file (explicit `path`, else
    /// `DUEL_RELAY_CONFIG`), then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(from_env);

        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "loading config file");
                Config::from_file(&path)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file; missing sections and fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `DUEL_*` overrides, reading variables through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DUEL_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        override_parsed(&lookup, "DUEL_TCP_PORT", &mut self.server.tcp_port)?;
        override_parsed(&lookup, "DUEL_WS_PORT", &mut self.server.ws_port)?;
        override_parsed(&lookup, "DUEL_LOBBY_PORT", &mut self.server.lobby_port)?;
        override_parsed(&lookup, "DUEL_MAX_CLIENTS", &mut self.server.max_clients)?;
        override_parsed(&lookup, "DUEL_PORT_MIN", &mut self.ports.min)?;
        override_parsed(&lookup, "DUEL_PORT_MAX", &mut self.ports.max)?;
        if let Some(v) = lookup("DUEL_ENGINE_PROGRAM") {
            self.engine.program = PathBuf::from(v);
        }
        if let Some(v) = lookup("DUEL_ENGINE_DIR") {
            self.engine.working_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DUEL_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.min >= self.ports.max {
            return Err(ConfigError::Invalid(format!(
                "engine port range [{}, {}) is empty",
                self.ports.min, self.ports.max
            )));
        }

        // Port 0 asks the OS for an ephemeral port and cannot collide.
        let listeners = [
            ("tcp_port", self.server.tcp_port),
            ("ws_port", self.server.ws_port),
            ("lobby_port", self.server.lobby_port),
        ];
        for (name, port) in listeners {
            if port != 0 && self.ports.contains(port) {
                return Err(ConfigError::Invalid(format!(
                    "server.{name} {port} lies inside the engine port range [{}, {})",
                    self.ports.min, self.ports.max
                )));
            }
        }
        for (i, (a_name, a)) in listeners.iter().enumerate() {
            for (b_name, b) in &listeners[i + 1..] {
                if *a != 0 && a == b {
                    return Err(ConfigError::Invalid(format!(
                        "server.{a_name} and server.{b_name} are both {a}"
                    )));
                }
            }
        }

        if self.engine.ready_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.ready_timeout_ms must be positive".to_string(),
            ));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid(
                "server.max_clients must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn port_allocator(&self) -> PortAllocator {
        PortAllocator::new(self.ports.min, self.ports.max)
    }

    /// Convenience: `addr:port` socket strings for the three listeners.
    pub fn tcp_addr_string(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.tcp_port)
    }

    pub fn ws_addr_string(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.ws_port)
    }

    pub fn lobby_addr_string(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.lobby_port)
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => {
            *slot = value.parse::<T>().map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value,
            })?;
            Ok(())
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.server.tcp_port, 8911);
        assert_eq!(config.server.ws_port, 8913);
        assert_eq!(config.server.lobby_port, 24555);
        assert_eq!(config.ports, PortRange { min: 7000, max: 8900 });
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
tcp_port = 9911

[engine]
program = "/opt/engine/run"
args = ["--quiet"]
ready_timeout_ms = 500

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.tcp_port, 9911);
        assert_eq!(config.server.ws_port, 8913);
        assert_eq!(config.engine.program, PathBuf::from("/opt/engine/run"));
        assert_eq!(config.engine.args, vec!["--quiet".to_string()]);
        assert_eq!(config.engine.ready_timeout(), Duration::from_millis(500));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.relay, RelayConfig::default());
    }

    #[test]
    fn bad_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\ntcp_port = ").unwrap();
        match Config::from_file(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("DUEL_BIND_ADDR", "127.0.0.1"),
                ("DUEL_LOBBY_PORT", "5000"),
                ("DUEL_PORT_MIN", "10000"),
                ("DUEL_PORT_MAX", "10010"),
                ("DUEL_ENGINE_DIR", "/srv/ygocore"),
                ("DUEL_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1");
        assert_eq!(config.server.lobby_port, 5000);
        assert_eq!(config.ports, PortRange { min: 10000, max: 10010 });
        assert_eq!(config.engine.working_dir, PathBuf::from("/srv/ygocore"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.lobby_addr_string(), "127.0.0.1:5000");
    }

    #[test]
    fn unparsable_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(lookup_from(&[("DUEL_TCP_PORT", "eighty")]))
            .unwrap_err();
        match err {
            ConfigError::Env { key, value } => {
                assert_eq!(key, "DUEL_TCP_PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_range() {
        let mut config = Config::default();
        config.ports = PortRange { min: 7000, max: 7000 };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_listener_inside_range() {
        let mut config = Config::default();
        config.server.ws_port = 7500;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_duplicate_listeners_but_allows_ephemeral() {
        let mut config = Config::default();
        config.server.ws_port = config.server.tcp_port;
        assert!(config.validate().is_err());

        config.server.tcp_port = 0;
        config.server.ws_port = 0;
        config.server.lobby_port = 0;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.engine.ready_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
