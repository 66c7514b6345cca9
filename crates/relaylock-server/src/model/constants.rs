// Configuration keys and defaults

pub const SERVER_ID: &str = "relaylock.server.id";
pub const SERVER_VERSION: &str = "relaylock.version";
pub const SERVER_ADDRESS: &str = "relaylock.server.address";
pub const CLIENT_PORT: &str = "relaylock.client.port";
pub const CLIENT_RETRY_INTERVAL_MS: &str = "relaylock.client.retry_interval_ms";
pub const RELAY_PORT: &str = "relaylock.relay.port";
pub const RELAY_WAIT_TIMEOUT_MS: &str = "relaylock.relay.wait_timeout_ms";
pub const RELAY_CHECK_INTERVAL_MS: &str = "relaylock.relay.check_interval_ms";
pub const RELAY_CONNECT_TIMEOUT_MS: &str = "relaylock.relay.connect_timeout_ms";
pub const RELAY_HANDSHAKE_TIMEOUT_MS: &str = "relaylock.relay.handshake_timeout_ms";
pub const MEMBER_LIST: &str = "relaylock.member.list";
pub const LOCK_SWEEP_INTERVAL_MS: &str = "relaylock.lock.sweep_interval_ms";
pub const LOCK_PROVISIONAL_TIMEOUT_MS: &str = "relaylock.lock.provisional_timeout_ms";
pub const TESTING: &str = "relaylock.testing";
pub const LOGS_PATH: &str = "relaylock.logs.path";
pub const LOGS_LEVEL: &str = "relaylock.logs.level";
pub const LOGS_CONSOLE: &str = "relaylock.logs.console";
pub const LOGS_FILE: &str = "relaylock.logs.file";

pub const DEFAULT_CONFIG_FILE: &str = "conf/relaylock.yml";
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_CLIENT_PORT: u16 = 10000;
pub const DEFAULT_RELAY_PORT: u16 = 20000;
pub const DEFAULT_CLIENT_RETRY_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RELAY_WAIT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_RELAY_CHECK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RELAY_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_RELAY_HANDSHAKE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_LOCK_SWEEP_INTERVAL_MS: u64 = 10;
pub const DEFAULT_LOCK_PROVISIONAL_TIMEOUT_MS: u64 = 1000;
