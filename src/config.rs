// src/config.rs

//! Manages bridge configuration: loading, resolving derived values, and validation.
//!
//! Settings come from an optional TOML file layered with `GATEBRIDGE__SECTION__KEY`
//! environment variables. Durations are humantime strings (`"15s"`, `"500ms"`).

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "GATEBRIDGE";

/// Which account the gateway session trades against.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

impl TradingMode {
    /// Parses a mode name; anything other than `live` falls back to paper.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "live" => TradingMode::Live,
            "paper" | "" => TradingMode::Paper,
            other => {
                warn!("Unknown trading mode '{other}', falling back to paper.");
                TradingMode::Paper
            }
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => f.write_str("paper"),
            TradingMode::Live => f.write_str("live"),
        }
    }
}

/// The kind of process the bridge connects to; it decides the default port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Gateway,
    Tws,
    /// A containerised gateway reached through a socat relay.
    Docker,
}

impl ClientType {
    /// Parses a client type, accepting the common aliases.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "gateway" | "ib_gateway" | "ibg" | "" => ClientType::Gateway,
            "tws" | "tws_api" | "tws_client" => ClientType::Tws,
            "docker" | "socat" => ClientType::Docker,
            other => {
                warn!("Unknown client type '{other}', treating it as gateway.");
                ClientType::Gateway
            }
        }
    }

    /// The conventional API port for this client type and trading mode.
    pub fn default_port(self, mode: TradingMode) -> u16 {
        match (self, mode) {
            (ClientType::Docker, _) => 4004,
            (ClientType::Tws, TradingMode::Paper) => 7497,
            (ClientType::Tws, TradingMode::Live) => 7496,
            (ClientType::Gateway, TradingMode::Paper) => 4002,
            (ClientType::Gateway, TradingMode::Live) => 4001,
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientType::Gateway => f.write_str("gateway"),
            ClientType::Tws => f.write_str("tws"),
            ClientType::Docker => f.write_str("docker"),
        }
    }
}

/// The resolved gateway endpoint settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub trading_mode: TradingMode,
    pub client_type: ClientType,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let trading_mode = TradingMode::default();
        let client_type = ClientType::default();
        Self {
            host: default_gateway_host(),
            port: client_type.default_port(trading_mode),
            client_id: default_client_id(),
            trading_mode,
            client_type,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct RawGatewayConfig {
    #[serde(default = "default_gateway_host")]
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default = "default_client_id")]
    client_id: i32,
    #[serde(default)]
    trading_mode: Option<String>,
    #[serde(default)]
    client_type: Option<String>,
}

impl Default for RawGatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: None,
            client_id: default_client_id(),
            trading_mode: None,
            client_type: None,
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}
fn default_client_id() -> i32 {
    1
}

/// Connection supervision timings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// Settle delay between a successful connect and the liveness re-check.
    #[serde(with = "humantime_serde")]
    pub stabilization_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Consecutive heartbeat failures before the process exits. 0 disables the exit.
    pub heartbeat_failures_before_exit: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(20),
            reconnect_interval: Duration::from_secs(10),
            stabilization_delay: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            heartbeat_failures_before_exit: 3,
        }
    }
}

/// Timings for the caller side of the async bridge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound between epoch checks while a caller waits on a call.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long a caller waits for a scheduled call to start on the loop.
    #[serde(with = "humantime_serde")]
    pub invoke_timeout: Duration,
    /// Default completion timeout for request-guard calls.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            invoke_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Admission-control settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LocksConfig {
    /// Slots per lock group. Entries given in configuration override the defaults.
    pub capacities: BTreeMap<String, usize>,
    /// Capacity of the `default` group when it is not listed in `capacities`.
    pub default_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Holds at or above this duration are logged as slow.
    #[serde(with = "humantime_serde")]
    pub warn_threshold: Duration,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            capacities: default_lock_capacities(),
            default_capacity: 2,
            acquire_timeout: Duration::from_secs(10),
            retry_attempts: 5,
            retry_backoff: Duration::from_millis(500),
            warn_threshold: Duration::from_millis(8000),
        }
    }
}

fn default_lock_capacities() -> BTreeMap<String, usize> {
    [
        ("default", 2),
        ("market", 2),
        ("options", 2),
        ("historical", 1),
        ("portfolio", 1),
        ("executions", 1),
        ("orders", 1),
    ]
    .into_iter()
    .map(|(name, capacity)| (name.to_string(), capacity))
    .collect()
}

/// Response cache TTLs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    #[serde(with = "ttl_map")]
    pub ttls: HashMap<String, Duration>,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttls: default_cache_ttls(),
            default_ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
struct RawCacheConfig {
    #[serde(default)]
    ttls: HashMap<String, humantime_serde::Serde<Duration>>,
    #[serde(default, with = "humantime_serde")]
    default_ttl: Option<Duration>,
}

fn default_cache_ttls() -> HashMap<String, Duration> {
    [
        ("market_data", Duration::from_secs(2)),
        ("option_chain", Duration::from_secs(300)),
        ("historical", Duration::from_secs(300)),
        ("executions", Duration::from_secs(10)),
        ("orders", Duration::from_secs(5)),
        ("portfolio", Duration::from_secs(5)),
        ("account_summary", Duration::from_secs(5)),
        ("pnl", Duration::from_secs(5)),
        ("contract_details", Duration::from_secs(86400)),
    ]
    .into_iter()
    .map(|(category, ttl)| (category.to_string(), ttl))
    .collect()
}

/// (De)serializes a category → duration map with humantime values.
mod ttl_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(map: &HashMap<String, Duration>, s: S) -> Result<S::Ok, S::Error> {
        let sorted: BTreeMap<&String, humantime_serde::Serde<Duration>> =
            map.iter().map(|(k, v)| (k, humantime_serde::Serde::from(*v))).collect();
        sorted.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HashMap<String, Duration>, D::Error> {
        let raw = HashMap::<String, humantime_serde::Serde<Duration>>::deserialize(d)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.into_inner())).collect())
    }
}

/// The read-only health server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 5050,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The configuration as read from file and environment, before resolution.
#[derive(Deserialize, Debug, Clone, Default)]
struct RawConfig {
    #[serde(default)]
    gateway: RawGatewayConfig,
    #[serde(default)]
    supervisor: SupervisorConfig,
    #[serde(default)]
    bridge: BridgeConfig,
    #[serde(default)]
    locks: RawLocksConfig,
    #[serde(default)]
    cache: RawCacheConfig,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    debug_logging: bool,
}

/// Like `LocksConfig`, but `capacities` starts empty so given entries can be
/// merged over the defaults instead of replacing them.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
struct RawLocksConfig {
    capacities: BTreeMap<String, usize>,
    default_capacity: usize,
    #[serde(with = "humantime_serde")]
    acquire_timeout: Duration,
    retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    warn_threshold: Duration,
}

impl Default for RawLocksConfig {
    fn default() -> Self {
        let defaults = LocksConfig::default();
        Self {
            capacities: BTreeMap::new(),
            default_capacity: defaults.default_capacity,
            acquire_timeout: defaults.acquire_timeout,
            retry_attempts: defaults.retry_attempts,
            retry_backoff: defaults.retry_backoff,
            warn_threshold: defaults.warn_threshold,
        }
    }
}

/// Represents the final, validated, and resolved bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub supervisor: SupervisorConfig,
    pub bridge: BridgeConfig,
    pub locks: LocksConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub log_level: String,
    /// Raises this crate's log level to debug regardless of `log_level`.
    pub debug_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            supervisor: SupervisorConfig::default(),
            bridge: BridgeConfig::default(),
            locks: LocksConfig::default(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            log_level: default_log_level(),
            debug_logging: false,
        }
    }
}

impl Config {
    /// Loads a TOML file (which must exist) layered with process environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(Path::new(path)), None)
    }

    /// Loads configuration from an optional file plus environment overrides.
    ///
    /// `env` replaces the process environment as the override source when given,
    /// with keys such as `GATEBRIDGE__GATEWAY__PORT`.
    pub fn load(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        let environment = ::config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env.map(|vars| vars.into_iter().collect()));
        builder = builder.add_source(environment);

        let source_name = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());
        let raw: RawConfig = builder
            .build()
            .with_context(|| format!("Failed to read configuration from '{source_name}'"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from '{source_name}'"))?;

        let config = Self::resolve(raw);
        config.validate()?;
        Ok(config)
    }

    /// Fills in derived values: gateway port defaults, merged capacity and TTL maps.
    fn resolve(raw: RawConfig) -> Self {
        let trading_mode = raw
            .gateway
            .trading_mode
            .as_deref()
            .map(TradingMode::parse_lenient)
            .unwrap_or_default();
        let client_type = raw
            .gateway
            .client_type
            .as_deref()
            .map(ClientType::parse_lenient)
            .unwrap_or_default();
        let port = match raw.gateway.port {
            Some(port) => {
                warn_on_mismatched_port(port, trading_mode);
                port
            }
            None => {
                let port = client_type.default_port(trading_mode);
                info!(
                    "Gateway port not set; using {port} for client={client_type} mode={trading_mode}"
                );
                port
            }
        };

        let mut capacities = default_lock_capacities();
        for (group, capacity) in raw.locks.capacities {
            if capacity == 0 {
                warn!("Lock group '{group}' configured with capacity 0; using 1.");
            }
            capacities.insert(group, capacity.max(1));
        }

        let mut ttls = default_cache_ttls();
        ttls.extend(
            raw.cache
                .ttls
                .into_iter()
                .map(|(category, ttl)| (category, ttl.into_inner())),
        );

        Config {
            gateway: GatewayConfig {
                host: raw.gateway.host,
                port,
                client_id: raw.gateway.client_id,
                trading_mode,
                client_type,
            },
            supervisor: raw.supervisor,
            bridge: raw.bridge,
            locks: LocksConfig {
                capacities,
                default_capacity: raw.locks.default_capacity.max(1),
                acquire_timeout: raw.locks.acquire_timeout,
                retry_attempts: raw.locks.retry_attempts,
                retry_backoff: raw.locks.retry_backoff,
                warn_threshold: raw.locks.warn_threshold,
            },
            cache: CacheConfig {
                ttls,
                default_ttl: raw.cache.default_ttl.unwrap_or(Duration::from_secs(5)),
            },
            http: raw.http,
            log_level: raw.log_level.unwrap_or_else(default_log_level),
            debug_logging: raw.debug_logging,
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            return Err(anyhow!("gateway.host cannot be empty"));
        }
        if self.gateway.port == 0 {
            return Err(anyhow!("gateway.port cannot be 0"));
        }
        if self.supervisor.connect_timeout.is_zero() {
            return Err(anyhow!("supervisor.connect_timeout cannot be 0"));
        }
        if self.supervisor.heartbeat_interval.is_zero() {
            return Err(anyhow!("supervisor.heartbeat_interval cannot be 0"));
        }
        if self.supervisor.heartbeat_timeout.is_zero() {
            return Err(anyhow!("supervisor.heartbeat_timeout cannot be 0"));
        }
        if self.supervisor.tick_interval.is_zero() {
            return Err(anyhow!("supervisor.tick_interval cannot be 0"));
        }
        if self.supervisor.heartbeat_timeout > self.supervisor.heartbeat_interval {
            warn!(
                "supervisor.heartbeat_timeout ({:?}) exceeds heartbeat_interval ({:?}); heartbeats will overlap the next interval.",
                self.supervisor.heartbeat_timeout, self.supervisor.heartbeat_interval
            );
        }
        if self.supervisor.heartbeat_failures_before_exit == 0 {
            warn!("supervisor.heartbeat_failures_before_exit is 0; a wedged connection will never restart the process.");
        }
        if self.bridge.poll_interval.is_zero() {
            return Err(anyhow!("bridge.poll_interval cannot be 0"));
        }
        if self.bridge.invoke_timeout.is_zero() {
            return Err(anyhow!("bridge.invoke_timeout cannot be 0"));
        }
        if self.locks.retry_attempts == 0 {
            return Err(anyhow!("locks.retry_attempts cannot be 0"));
        }
        if self.http.enabled {
            if self.http.port == 0 {
                return Err(anyhow!("http.port cannot be 0"));
            }
            if self.http.host.trim().is_empty() {
                return Err(anyhow!("http.host cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Warns when an explicit port is the conventional port of the other trading mode.
fn warn_on_mismatched_port(port: u16, mode: TradingMode) {
    match mode {
        TradingMode::Paper if matches!(port, 4001 | 7496) => warn!(
            "Gateway port {port} looks like a live port while trading mode is paper. Expected 4002 (gateway) or 7497 (tws)."
        ),
        TradingMode::Live if matches!(port, 4002 | 7497) => warn!(
            "Gateway port {port} looks like a paper port while trading mode is live. Expected 4001 (gateway) or 7496 (tws)."
        ),
        _ => {}
    }
}
