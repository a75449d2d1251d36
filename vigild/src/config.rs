//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use vigil_connectors::DirectionBands;
use vigil_domain::{Leverage, Symbol, Thresholds};
use vigil_engine::{CommissionPlans, RetryPolicy};
use vigil_exec::MicroserviceEndpoint;

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (test, development, production)
    pub environment: Environment,

    /// API server configuration
    pub api: ApiConfig,

    /// Tradable symbols and their closure thresholds
    pub symbols: SymbolTable,

    /// Admission limits and defaults
    pub positions: PositionConfig,

    /// Commission percentages and classification window
    pub commission: CommissionConfig,

    /// Periodic task cadences
    pub schedule: ScheduleConfig,

    /// Downstream microservices and how orders are routed to them
    pub downstream: DownstreamConfig,

    /// Price and sentiment feeds
    pub oracle: OracleConfig,

    /// Bound for every price lookup and downstream call
    pub call_timeout: Duration,

    /// Positions evaluated concurrently within one cycle
    pub evaluation_concurrency: usize,

    /// In-place retries for storage writes
    pub persistence_retry: RetryPolicy,

    /// PostgreSQL URL (`DATABASE_URL`); in-memory store when absent
    pub database_url: Option<String>,

    /// Value of the `supervisor` field in downstream payloads
    pub supervisor_name: String,

    /// Log output format
    pub log_format: LogFormat,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Per-symbol take-profit / stop-loss table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: BTreeMap<String, Thresholds>,
}

impl SymbolTable {
    pub fn insert(&mut self, symbol: &Symbol, thresholds: Thresholds) {
        self.entries.insert(symbol.as_pair(), thresholds);
    }

    pub fn thresholds(&self, symbol: &Symbol) -> Option<Thresholds> {
        self.entries.get(&symbol.as_pair()).copied()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.contains_key(&symbol.as_pair())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Admission configuration.
#[derive(Debug, Clone)]
pub struct PositionConfig {
    /// Leverage applied when the request does not carry one
    pub default_leverage: Leverage,
    /// PENDING/OPEN positions a user may hold at once
    pub max_positions_per_user: usize,
}

/// Commission configuration.
#[derive(Debug, Clone)]
pub struct CommissionConfig {
    /// Percentage per billing plan
    pub plans: CommissionPlans,
    /// A real-money payment this recent makes the commission REAL
    pub real_payment_lookback: chrono::Duration,
}

/// Cadence of each scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub operations: Duration,
    pub commission_sweep: Duration,
    pub health_probe: Duration,
    pub accounting_reconciliation: Duration,
    pub pending_retry: Duration,
}

/// Registry names of the microservices each order goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroserviceRoutes {
    pub accounting: String,
    pub commission: String,
    pub payments: String,
}

impl Default for MicroserviceRoutes {
    fn default() -> Self {
        Self {
            accounting: "accounting".to_string(),
            commission: "commission".to_string(),
            payments: "payments".to_string(),
        }
    }
}

/// Downstream configuration.
#[derive(Debug, Clone)]
pub struct DownstreamConfig {
    /// Configured microservices
    pub microservices: Vec<MicroserviceEndpoint>,
    /// Routing of order actions
    pub routes: MicroserviceRoutes,
    /// Pending-order retry policy
    pub retry: RetryPolicy,
}

/// Price and sentiment feed configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Ticker API base URL
    pub price_url: String,
    /// Fear & Greed API base URL
    pub fear_greed_url: String,
    /// Index bands mapping to allowed directions
    pub bands: DirectionBands,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;

        let symbols = match env::var("VIGIL_SYMBOLS") {
            Ok(raw) => parse_symbols(&raw)?,
            Err(_) => default_symbols(),
        };

        let positions = PositionConfig {
            default_leverage: Leverage::new(load_env("VIGIL_DEFAULT_LEVERAGE", 10u32)?)
                .map_err(|e| DaemonError::Config(e.to_string()))?,
            max_positions_per_user: load_env("VIGIL_MAX_POSITIONS_PER_USER", 2usize)?,
        };

        let plans = CommissionPlans::new(
            load_env("VIGIL_PLAN_SUBSCRIPTION_PERCENT", Decimal::TEN)?,
            load_env("VIGIL_PLAN_PREPAID_PERCENT", Decimal::from(20))?,
        )
        .map_err(|e| DaemonError::Config(e.to_string()))?;
        let commission = CommissionConfig {
            plans,
            real_payment_lookback: chrono::Duration::days(load_env("VIGIL_REAL_PAYMENT_LOOKBACK_DAYS", 30i64)?),
        };

        let schedule = ScheduleConfig {
            operations: secs("VIGIL_OPERATIONS_INTERVAL_SECS", 30)?,
            commission_sweep: secs("VIGIL_COMMISSION_SWEEP_INTERVAL_SECS", 60)?,
            health_probe: secs("VIGIL_HEALTH_PROBE_INTERVAL_SECS", 60)?,
            accounting_reconciliation: secs("VIGIL_ACCOUNTING_INTERVAL_SECS", 300)?,
            pending_retry: secs("VIGIL_PENDING_RETRY_INTERVAL_SECS", 300)?,
        };

        let retry = RetryPolicy::new(
            load_env("VIGIL_RETRY_MAX_ATTEMPTS", 5u32)?,
            secs("VIGIL_RETRY_HORIZON_SECS", 3600)?,
            secs("VIGIL_RETRY_BASE_DELAY_SECS", 30)?,
            secs("VIGIL_RETRY_MAX_DELAY_SECS", 600)?,
        )
        .map_err(|e| DaemonError::Config(e.to_string()))?;

        let microservices = match env::var("VIGIL_MICROSERVICES") {
            Ok(raw) => parse_microservices(&raw)?,
            Err(_) => default_microservices(),
        };

        let downstream = DownstreamConfig {
            microservices,
            routes: MicroserviceRoutes::default(),
            retry,
        };

        let oracle = OracleConfig {
            price_url: env::var("VIGIL_PRICE_ORACLE_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            fear_greed_url: env::var("VIGIL_FEAR_GREED_URL")
                .unwrap_or_else(|_| "https://api.alternative.me".to_string()),
            bands: DirectionBands {
                long_only_below: load_env("VIGIL_FEAR_GREED_LONG_ONLY_BELOW", 30u8)?,
                short_only_above: load_env("VIGIL_FEAR_GREED_SHORT_ONLY_ABOVE", 80u8)?,
            },
        };

        let log_format = match env::var("VIGIL_LOG_FORMAT") {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::Text,
        };

        let config = Self {
            environment,
            api,
            symbols,
            positions,
            commission,
            schedule,
            downstream,
            oracle,
            call_timeout: Duration::from_millis(load_env("VIGIL_CALL_TIMEOUT_MS", 5000u64)?),
            evaluation_concurrency: load_env("VIGIL_EVALUATION_CONCURRENCY", 8usize)?,
            persistence_retry: RetryPolicy::persistence(),
            database_url: env::var("DATABASE_URL").ok(),
            supervisor_name: env::var("VIGIL_SUPERVISOR_NAME").unwrap_or_else(|_| "vigil".to_string()),
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            symbols: default_symbols(),
            positions: PositionConfig {
                default_leverage: Leverage::new(10).expect("10x is within leverage bounds"),
                max_positions_per_user: 2,
            },
            commission: CommissionConfig {
                plans: CommissionPlans::default(),
                real_payment_lookback: chrono::Duration::days(30),
            },
            schedule: ScheduleConfig {
                operations: Duration::from_millis(50),
                commission_sweep: Duration::from_millis(100),
                health_probe: Duration::from_millis(100),
                accounting_reconciliation: Duration::from_millis(200),
                pending_retry: Duration::from_millis(100),
            },
            downstream: DownstreamConfig {
                microservices: vec![
                    MicroserviceEndpoint::new("accounting", "http://accounting.test"),
                    MicroserviceEndpoint::new("commission", "http://commission.test"),
                    MicroserviceEndpoint::new("payments", "http://payments.test"),
                ],
                routes: MicroserviceRoutes::default(),
                retry: RetryPolicy {
                    max_attempts: 3,
                    horizon: Duration::from_secs(3600),
                    base_delay: Duration::ZERO,
                    max_delay: Duration::ZERO,
                },
            },
            oracle: OracleConfig {
                price_url: "http://oracle.test".to_string(),
                fear_greed_url: "http://fng.test".to_string(),
                bands: DirectionBands::default(),
            },
            call_timeout: Duration::from_millis(200),
            evaluation_concurrency: 4,
            persistence_retry: RetryPolicy {
                max_attempts: 3,
                horizon: Duration::from_secs(1),
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
            database_url: None,
            supervisor_name: "vigil-test".to_string(),
            log_format: LogFormat::Text,
        }
    }

    /// Cross-field checks run after loading.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.symbols.is_empty() {
            return Err(DaemonError::Config("at least one symbol must be configured".to_string()));
        }
        if self.positions.max_positions_per_user == 0 {
            return Err(DaemonError::Config(
                "VIGIL_MAX_POSITIONS_PER_USER must be at least 1".to_string(),
            ));
        }
        let s = &self.schedule;
        for (name, every) in [
            ("operations", s.operations),
            ("commission_sweep", s.commission_sweep),
            ("health_probe", s.health_probe),
            ("accounting_reconciliation", s.accounting_reconciliation),
            ("pending_retry", s.pending_retry),
        ] {
            if every.is_zero() {
                return Err(DaemonError::Config(format!("{} interval must be positive", name)));
            }
        }
        if self.evaluation_concurrency == 0 {
            return Err(DaemonError::Config(
                "VIGIL_EVALUATION_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.oracle.bands.long_only_below > self.oracle.bands.short_only_above {
            return Err(DaemonError::Config(format!(
                "Fear & Greed bands overlap: long-only below {} but short-only above {}",
                self.oracle.bands.long_only_below, self.oracle.bands.short_only_above
            )));
        }
        let routes = &self.downstream.routes;
        for name in [&routes.accounting, &routes.commission, &routes.payments] {
            if !self.downstream.microservices.iter().any(|m| &m.name == name) {
                return Err(DaemonError::Config(format!(
                    "microservice '{}' is routed to but not configured in VIGIL_MICROSERVICES",
                    name
                )));
            }
        }
        if self.environment == Environment::Production && self.database_url.is_none() {
            return Err(DaemonError::Config("DATABASE_URL is required in production".to_string()));
        }
        Ok(())
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("VIGIL_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid VIGIL_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("VIGIL_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = load_env("VIGIL_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self::test();
        config.environment = Environment::Development;
        config.api = ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        };
        config.schedule = ScheduleConfig {
            operations: Duration::from_secs(30),
            commission_sweep: Duration::from_secs(60),
            health_probe: Duration::from_secs(60),
            accounting_reconciliation: Duration::from_secs(300),
            pending_retry: Duration::from_secs(300),
        };
        config.downstream.microservices = default_microservices();
        config.downstream.retry = RetryPolicy::default();
        config.call_timeout = Duration::from_secs(5);
        config.evaluation_concurrency = 8;
        config.persistence_retry = RetryPolicy::persistence();
        config.supervisor_name = "vigil".to_string();
        config
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(DaemonError::Config(format!(
                "Invalid VIGIL_LOG_FORMAT: {}. Expected: text, json",
                other
            ))),
        }
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

/// Parse `BTCUSDT:15:10,ETHUSDT:12:8` (symbol:take_profit:stop_loss).
pub fn parse_symbols(raw: &str) -> DaemonResult<SymbolTable> {
    let mut table = SymbolTable::default();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [pair, tp, sl] = parts.as_slice() else {
            return Err(DaemonError::Config(format!(
                "Invalid VIGIL_SYMBOLS entry '{}': expected SYMBOL:TP:SL",
                entry
            )));
        };

        let symbol = Symbol::from_pair(pair).map_err(|e| DaemonError::Config(e.to_string()))?;
        let tp = Decimal::from_str(tp)
            .map_err(|_| DaemonError::Config(format!("Invalid take-profit in '{}'", entry)))?;
        let sl = Decimal::from_str(sl)
            .map_err(|_| DaemonError::Config(format!("Invalid stop-loss in '{}'", entry)))?;
        let thresholds = Thresholds::new(tp, sl).map_err(|e| DaemonError::Config(e.to_string()))?;

        table.insert(&symbol, thresholds);
    }

    if table.is_empty() {
        return Err(DaemonError::Config("VIGIL_SYMBOLS is empty".to_string()));
    }
    Ok(table)
}

/// Parse `commission=http://host:8001,accounting=http://host:8002`.
pub fn parse_microservices(raw: &str) -> DaemonResult<Vec<MicroserviceEndpoint>> {
    let mut services: Vec<MicroserviceEndpoint> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, endpoint) = entry.split_once('=').ok_or_else(|| {
            DaemonError::Config(format!(
                "Invalid VIGIL_MICROSERVICES entry '{}': expected name=url",
                entry
            ))
        })?;
        let (name, endpoint) = (name.trim(), endpoint.trim());

        if name.is_empty() || !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(DaemonError::Config(format!(
                "Invalid VIGIL_MICROSERVICES entry '{}': expected name=http(s)://...",
                entry
            )));
        }
        if services.iter().any(|s| s.name == name) {
            return Err(DaemonError::Config(format!("Duplicate microservice '{}'", name)));
        }

        services.push(MicroserviceEndpoint::new(name, endpoint));
    }

    Ok(services)
}

fn default_symbols() -> SymbolTable {
    let mut table = SymbolTable::default();
    for pair in ["BTCUSDT", "ETHUSDT"] {
        if let (Ok(symbol), Ok(thresholds)) = (
            Symbol::from_pair(pair),
            Thresholds::new(Decimal::from(15), Decimal::TEN),
        ) {
            table.insert(&symbol, thresholds);
        }
    }
    table
}

fn default_microservices() -> Vec<MicroserviceEndpoint> {
    vec![
        MicroserviceEndpoint::new("accounting", "http://localhost:8101"),
        MicroserviceEndpoint::new("commission", "http://localhost:8102"),
        MicroserviceEndpoint::new("payments", "http://localhost:8103"),
    ]
}

fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        Err(_) => Ok(default),
    }
}

fn secs(key: &str, default: u64) -> DaemonResult<Duration> {
    load_env(key, default).map(Duration::from_secs)
}

// =============================================================================
// Tests
// =============================================================================
