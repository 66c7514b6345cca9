//! Configuration management for the relaylock server
//!
//! Values come from, lowest priority first: the optional `conf/relaylock.yml`
//! file, `RELAYLOCK__*` environment variables (`__` separates key segments,
//! e.g. `RELAYLOCK__CLIENT__PORT=10001`), and command line flags.

use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use relaylock_common::DEFAULT_VERSION;
use relaylock_consistency::LockManagerConfig;
use relaylock_core::{RelayManagerConfig, parse_member_list};

use super::constants::*;
use crate::server::ServerConfig;

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "relaylock-server", version, about = "Cluster-replicated distributed lock server")]
pub struct Cli {
    /// Port to bind to for client connections
    #[arg(long = "clients")]
    pub client_port: Option<u16>,
    /// Port to bind to for relay connections
    #[arg(long = "relays")]
    pub relay_port: Option<u16>,
    /// Node id announced to peers and clients
    #[arg(long = "id")]
    pub id: Option<String>,
    /// Comma separated host:port list of relay listeners
    #[arg(long = "members")]
    pub members: Option<String>,
    /// Periodically run a self-test lock acquisition
    #[arg(long = "testing")]
    pub testing: bool,
    /// Configuration file, skipped when missing
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            client_port: None,
            relay_port: None,
            id: None,
            members: None,
            testing: false,
            config_file: DEFAULT_CONFIG_FILE.to_string(),
        }
    }
}

/// Application configuration loaded from config files, environment and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load using the process command line
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&cli.config_file).required(false))
            .add_source(
                Environment::with_prefix("relaylock")
                    .prefix_separator("__")
                    .separator("__")
                    .keep_prefix(true)
                    .try_parsing(true),
            );

        if let Some(v) = cli.client_port {
            builder = builder.set_override(CLIENT_PORT, i64::from(v))?;
        }
        if let Some(v) = cli.relay_port {
            builder = builder.set_override(RELAY_PORT, i64::from(v))?;
        }
        if let Some(v) = cli.id {
            builder = builder.set_override(SERVER_ID, v)?;
        }
        if let Some(v) = cli.members {
            builder = builder.set_override(MEMBER_LIST, v)?;
        }
        if cli.testing {
            builder = builder.set_override(TESTING, true)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    // ========================================================================
    // Server identity and listeners
    // ========================================================================

    pub fn id(&self) -> String {
        self.config
            .get_string(SERVER_ID)
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("server-on-port-{}", self.relay_port()))
    }

    pub fn version(&self) -> String {
        self.config
            .get_string(SERVER_VERSION)
            .unwrap_or(DEFAULT_VERSION.to_string())
    }

    pub fn address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS)
            .unwrap_or(DEFAULT_ADDRESS.to_string())
    }

    pub fn client_port(&self) -> u16 {
        self.port(CLIENT_PORT, DEFAULT_CLIENT_PORT)
    }

    pub fn relay_port(&self) -> u16 {
        self.port(RELAY_PORT, DEFAULT_RELAY_PORT)
    }

    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.address(), self.client_port())
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.address(), self.relay_port())
    }

    pub fn members(&self) -> Vec<String> {
        parse_member_list(&self.config.get_string(MEMBER_LIST).unwrap_or_default())
    }

    pub fn testing(&self) -> bool {
        self.config.get_bool(TESTING).unwrap_or(false)
    }

    // ========================================================================
    // Timing
    // ========================================================================

    pub fn client_retry_interval(&self) -> Duration {
        self.millis(CLIENT_RETRY_INTERVAL_MS, DEFAULT_CLIENT_RETRY_INTERVAL_MS)
    }

    pub fn relay_wait_timeout(&self) -> Duration {
        self.millis(RELAY_WAIT_TIMEOUT_MS, DEFAULT_RELAY_WAIT_TIMEOUT_MS)
    }

    pub fn relay_check_interval(&self) -> Duration {
        self.millis(RELAY_CHECK_INTERVAL_MS, DEFAULT_RELAY_CHECK_INTERVAL_MS)
    }

    pub fn relay_connect_timeout(&self) -> Duration {
        self.millis(RELAY_CONNECT_TIMEOUT_MS, DEFAULT_RELAY_CONNECT_TIMEOUT_MS)
    }

    pub fn relay_handshake_timeout(&self) -> Duration {
        self.millis(RELAY_HANDSHAKE_TIMEOUT_MS, DEFAULT_RELAY_HANDSHAKE_TIMEOUT_MS)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        self.millis(LOCK_SWEEP_INTERVAL_MS, DEFAULT_LOCK_SWEEP_INTERVAL_MS)
    }

    pub fn lock_provisional_timeout(&self) -> Duration {
        self.millis(LOCK_PROVISIONAL_TIMEOUT_MS, DEFAULT_LOCK_PROVISIONAL_TIMEOUT_MS)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string(LOGS_PATH).ok()
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOGS_LEVEL)
            .unwrap_or("info".to_string())
    }

    pub fn log_console(&self) -> bool {
        self.config.get_bool(LOGS_CONSOLE).unwrap_or(true)
    }

    pub fn log_file(&self) -> bool {
        self.config.get_bool(LOGS_FILE).unwrap_or(true)
    }

    // ========================================================================
    // Component settings
    // ========================================================================

    pub fn lock_manager_config(&self) -> LockManagerConfig {
        LockManagerConfig {
            sweep_interval: self.lock_sweep_interval(),
            ..Default::default()
        }
    }

    pub fn relay_manager_config(&self) -> RelayManagerConfig {
        RelayManagerConfig {
            node_id: self.id(),
            version: self.version(),
            members: self.members(),
            wait_timeout: self.relay_wait_timeout(),
            check_interval: self.relay_check_interval(),
            connect_timeout: self.relay_connect_timeout(),
            handshake_timeout: self.relay_handshake_timeout(),
            provisional_timeout: self.lock_provisional_timeout(),
            ..Default::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            id: self.id(),
            version: self.version(),
            client_addr: self.client_addr(),
            relay_addr: self.relay_addr(),
            provisional_timeout: self.lock_provisional_timeout(),
            retry_interval: self.client_retry_interval(),
            testing: self.testing(),
            lock: self.lock_manager_config(),
            relay: self.relay_manager_config(),
            ..Default::default()
        }
    }

    fn port(&self, key: &str, default: u16) -> u16 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: u64) -> Duration {
        let ms = self
            .config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["relaylock-server", "--config", "does/not/exist.yml"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::from_cli(cli(&[])).unwrap();
        assert_eq!(config.client_port(), 10000);
        assert_eq!(config.relay_port(), 20000);
        assert_eq!(config.id(), "server-on-port-20000");
        assert_eq!(config.version(), "1.0.0");
        assert_eq!(config.client_addr(), "0.0.0.0:10000");
        assert!(config.members().is_empty());
        assert!(!config.testing());
        assert_eq!(config.lock_sweep_interval(), Duration::from_millis(10));
        assert_eq!(config.client_retry_interval(), Duration::from_millis(100));
        assert_eq!(config.relay_wait_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_cli_overrides() {
        let config = Configuration::from_cli(cli(&[
            "--clients",
            "10001",
            "--relays",
            "20001",
            "--members",
            "127.0.0.1:20000,127.0.0.1:20001",
            "--testing",
        ]))
        .unwrap();

        assert_eq!(config.client_port(), 10001);
        assert_eq!(config.id(), "server-on-port-20001");
        assert_eq!(config.members(), vec!["127.0.0.1:20000", "127.0.0.1:20001"]);
        assert!(config.testing());

        let relay = config.relay_manager_config();
        assert_eq!(relay.node_id, "server-on-port-20001");
        assert_eq!(relay.members.len(), 2);
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaylock.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "relaylock:\n  server:\n    id: node-a\n  client:\n    retry_interval_ms: 50\n  lock:\n    provisional_timeout_ms: 250\n  logs:\n    console: false"
        )
        .unwrap();

        let path = path.to_string_lossy().to_string();
        let config = Configuration::from_cli(
            Cli::try_parse_from(["relaylock-server", "--config", &path, "--clients", "10005"])
                .unwrap(),
        )
        .unwrap();

        assert_eq!(config.id(), "node-a");
        assert_eq!(config.client_port(), 10005);
        assert_eq!(config.client_retry_interval(), Duration::from_millis(50));
        assert_eq!(config.lock_provisional_timeout(), Duration::from_millis(250));
        assert!(!config.log_console());

        let server = config.server_config();
        assert_eq!(server.id, "node-a");
        assert_eq!(server.client_addr, "0.0.0.0:10005");
        assert_eq!(server.provisional_timeout, Duration::from_millis(250));
    }
}
