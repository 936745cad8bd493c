use std::env;
use std::time::Duration;

/// Which market gateway backs the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Live exchange over HTTP.
    Http,
    /// Map-backed dry run; nothing leaves the process.
    Memory,
}

impl GatewayMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "memory" | "mock" | "dry-run" => GatewayMode::Memory,
            _ => GatewayMode::Http,
        }
    }
}

/// Exchange connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    /// Public read endpoint (clearinghouse state, candles).
    pub info_url: String,
    /// Authenticated order relay.
    pub exec_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub candle_cache_ttl: Duration,
}

/// Scheduled cycle settings.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub scheduler_enabled: bool,
    pub risk_interval: Duration,
    pub strategy_interval: Duration,
    pub snapshot_interval: Duration,
    pub deadline: Duration,
    pub lease_ttl: Duration,
}

/// Alert retention in days.
#[derive(Debug, Clone)]
pub struct AlertRetentionConfig {
    pub delete_acknowledged_after_days: i64,
    pub auto_resolve_after_days: i64,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite ledger path.
    pub database_path: String,
    /// Bearer secret accepted by the cron endpoints. Unset disables them.
    pub cron_secret: Option<String>,
    /// Value accepted in the `x-agent-key` header.
    pub trusted_agent_key: Option<String>,
    /// `wallet=token,...` pairs for the static credential provider.
    pub access_tokens: String,
    pub gateway: GatewayConfig,
    pub cycles: CycleConfig,
    pub alerts: AlertRetentionConfig,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn secret(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 3002),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "vigil.db".to_string()),
            cron_secret: secret("CRON_SECRET"),
            trusted_agent_key: secret("TRUSTED_AGENT_KEY"),
            access_tokens: env::var("ACCESS_TOKENS").unwrap_or_default(),
            gateway: GatewayConfig {
                mode: env::var("GATEWAY_MODE")
                    .map(|v| GatewayMode::parse(&v))
                    .unwrap_or(GatewayMode::Http),
                info_url: env::var("GATEWAY_INFO_URL")
                    .unwrap_or_else(|_| "https://api.hyperliquid.xyz/info".to_string()),
                exec_url: env::var("GATEWAY_EXEC_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8787".to_string()),
                timeout: Duration::from_millis(parse_or("GATEWAY_TIMEOUT_MS", 10_000)),
                max_retries: parse_or("GATEWAY_MAX_RETRIES", 2),
                candle_cache_ttl: Duration::from_secs(parse_or("CANDLE_CACHE_TTL_SECS", 60)),
            },
            cycles: CycleConfig {
                scheduler_enabled: flag_or("SCHEDULER_ENABLED", true),
                risk_interval: Duration::from_secs(parse_or("RISK_INTERVAL_SECS", 300)),
                strategy_interval: Duration::from_secs(parse_or("STRATEGY_INTERVAL_SECS", 300)),
                snapshot_interval: Duration::from_secs(parse_or("SNAPSHOT_INTERVAL_SECS", 86_400)),
                deadline: Duration::from_secs(parse_or("CYCLE_DEADLINE_SECS", 240)),
                lease_ttl: Duration::from_secs(parse_or("LEASE_TTL_SECS", 600)),
            },
            alerts: AlertRetentionConfig {
                delete_acknowledged_after_days: parse_or("ALERT_DELETE_AFTER_DAYS", 30),
                auto_resolve_after_days: parse_or("ALERT_AUTO_RESOLVE_DAYS", 7),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment is process-global; serialize tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // =========================================================================
    // Parsing Helpers
    // =========================================================================

    #[test]
    fn test_gateway_mode_parse() {
        assert_eq!(GatewayMode::parse("memory"), GatewayMode::Memory);
        assert_eq!(GatewayMode::parse(" MOCK "), GatewayMode::Memory);
        assert_eq!(GatewayMode::parse("http"), GatewayMode::Http);
        assert_eq!(GatewayMode::parse("anything"), GatewayMode::Http);
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        env::set_var("VIGIL_TEST_NUMBER", "not-a-number");
        assert_eq!(parse_or("VIGIL_TEST_NUMBER", 42u64), 42);
        env::set_var("VIGIL_TEST_NUMBER", " 7 ");
        assert_eq!(parse_or("VIGIL_TEST_NUMBER", 42u64), 7);
        env::remove_var("VIGIL_TEST_NUMBER");
    }

    #[test]
    fn test_empty_secret_is_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        env::set_var("VIGIL_TEST_SECRET", "  ");
        assert_eq!(secret("VIGIL_TEST_SECRET"), None);
        env::set_var("VIGIL_TEST_SECRET", "s3cret");
        assert_eq!(secret("VIGIL_TEST_SECRET").as_deref(), Some("s3cret"));
        env::remove_var("VIGIL_TEST_SECRET");
    }

    // =========================================================================
    // Config Tests
    // =========================================================================

    #[test]
    fn test_from_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        env::set_var("GATEWAY_TIMEOUT_MS", "2500");
        env::set_var("SCHEDULER_ENABLED", "false");
        env::set_var("ALERT_AUTO_RESOLVE_DAYS", "3");

        let config = Config::from_env();
        assert_eq!(config.gateway.timeout, Duration::from_millis(2500));
        assert!(!config.cycles.scheduler_enabled);
        assert_eq!(config.alerts.auto_resolve_after_days, 3);

        env::remove_var("GATEWAY_TIMEOUT_MS");
        env::remove_var("SCHEDULER_ENABLED");
        env::remove_var("ALERT_AUTO_RESOLVE_DAYS");
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let config = Config::from_env();
        assert_eq!(config.cycles.deadline, Duration::from_secs(240));
        assert_eq!(config.cycles.lease_ttl, Duration::from_secs(600));
        assert_eq!(config.alerts.delete_acknowledged_after_days, 30);
        assert_eq!(config.gateway.max_retries, 2);
    }
}
