use std::collections::HashSet;
use std::env;

use crate::model::{ActivityAction, LogLevel, ResourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "staging" | "stage" => Some(Environment::Staging),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Logging policy for one process. Computed once and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPolicy {
    pub environment: Environment,
    pub min_level: LogLevel,
    pub batching_enabled: bool,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    /// Retention horizon reported to operators; nothing here deletes rows.
    pub archive_days: u32,
    pub excluded_actions: HashSet<ActivityAction>,
    pub excluded_resource_types: HashSet<ResourceType>,
    pub security_logging_enabled: bool,
    pub performance_logging_enabled: bool,
    pub mask_sensitive_data: bool,
}

impl LogPolicy {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => LogPolicy {
                environment,
                min_level: LogLevel::Debug,
                batching_enabled: false,
                batch_size: 10,
                batch_interval_ms: 5_000,
                archive_days: 30,
                excluded_actions: HashSet::new(),
                excluded_resource_types: HashSet::new(),
                security_logging_enabled: true,
                performance_logging_enabled: true,
                mask_sensitive_data: false,
            },
            Environment::Staging => LogPolicy {
                environment,
                min_level: LogLevel::Info,
                batching_enabled: true,
                batch_size: 50,
                batch_interval_ms: 10_000,
                archive_days: 60,
                excluded_actions: HashSet::from([ActivityAction::View]),
                excluded_resource_types: HashSet::new(),
                security_logging_enabled: true,
                performance_logging_enabled: true,
                mask_sensitive_data: true,
            },
            Environment::Production => LogPolicy {
                environment,
                min_level: LogLevel::Info,
                batching_enabled: true,
                batch_size: 100,
                batch_interval_ms: 30_000,
                archive_days: 90,
                excluded_actions: HashSet::from([ActivityAction::View]),
                excluded_resource_types: HashSet::from([ResourceType::Draft]),
                security_logging_enabled: true,
                performance_logging_enabled: false,
                mask_sensitive_data: true,
            },
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves the policy from an arbitrary variable source. Overrides that
    /// fail to parse or fall out of range are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("APP_ENV")
            .and_then(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);
        let mut policy = Self::for_environment(environment);

        if let Some(level) = lookup("LOG_LEVEL")
            .and_then(|v| v.trim().parse::<u8>().ok())
            .and_then(LogLevel::from_ordinal)
        {
            policy.min_level = level;
        }
        if let Some(v) = lookup("LOG_BATCH_ENABLED") {
            policy.batching_enabled = v.trim() == "true";
        }
        if let Some(size) = lookup("LOG_BATCH_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            policy.batch_size = size;
        }
        if let Some(ms) = lookup("LOG_BATCH_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
        {
            policy.batch_interval_ms = ms;
        }
        if let Some(days) = lookup("LOG_ARCHIVE_DAYS").and_then(|v| v.trim().parse::<u32>().ok()) {
            policy.archive_days = days;
        }
        policy
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        self.min_level != LogLevel::Off && level >= self.min_level
    }

    pub fn should_log_action(&self, action: ActivityAction, resource_type: ResourceType) -> bool {
        !self.excluded_actions.contains(&action) && !self.excluded_resource_types.contains(&resource_type)
    }
}

/// Settings of the ingestion service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_id: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub http_bind: String,
    pub api_token: String,
    pub security_sweep_interval_ms: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, String> {
        let service_id = env::var("SERVICE_ID")
            .unwrap_or_else(|_| format!("activity-logd-{}", uuid::Uuid::new_v4()));
        if service_id.trim().is_empty() {
            return Err("SERVICE_ID cannot be empty".to_string());
        }

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost:5432/activity".to_string());
        if database_url.trim().is_empty() {
            return Err("DATABASE_URL cannot be empty".to_string());
        }
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            return Err("DATABASE_URL must be a postgres:// url".to_string());
        }

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .map_err(|_| "DB_MAX_CONNECTIONS must be a number".to_string())?;
        if !(1..=64).contains(&db_max_connections) {
            return Err("DB_MAX_CONNECTIONS must be between 1 and 64".to_string());
        }

        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:9091".to_string());
        if http_bind.trim().is_empty() {
            return Err("HTTP_BIND cannot be empty".to_string());
        }

        let api_token = env::var("API_TOKEN").map_err(|_| "API_TOKEN must be set".to_string())?;
        if api_token.trim().is_empty() {
            return Err("API_TOKEN cannot be empty".to_string());
        }

        let security_sweep_interval_ms = env::var("SECURITY_SWEEP_INTERVAL_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse::<u64>()
            .map_err(|_| "SECURITY_SWEEP_INTERVAL_MS must be a number".to_string())?;
        if !(1_000..=3_600_000).contains(&security_sweep_interval_ms) {
            return Err("SECURITY_SWEEP_INTERVAL_MS must be between 1000 and 3600000".to_string());
        }

        Ok(ServiceConfig {
            service_id,
            database_url,
            db_max_connections,
            http_bind,
            api_token,
            security_sweep_interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_follow_environment() {
        let dev = LogPolicy::from_lookup(lookup(&[]));
        assert_eq!(dev.environment, Environment::Development);
        assert_eq!(dev.min_level, LogLevel::Debug);
        assert!(!dev.batching_enabled);
        assert!(!dev.mask_sensitive_data);

        let prod = LogPolicy::from_lookup(lookup(&[("APP_ENV", "production")]));
        assert_eq!(prod.batch_size, 100);
        assert!(prod.batching_enabled);
        assert!(prod.mask_sensitive_data);
        assert!(prod.excluded_actions.contains(&ActivityAction::View));

        let staging = LogPolicy::from_lookup(lookup(&[("APP_ENV", "stage")]));
        assert_eq!(staging.environment, Environment::Staging);
    }

    #[test]
    fn overrides_take_precedence() {
        let p = LogPolicy::from_lookup(lookup(&[
            ("APP_ENV", "production"),
            ("LOG_LEVEL", "3"),
            ("LOG_BATCH_ENABLED", "false"),
            ("LOG_BATCH_SIZE", "7"),
            ("LOG_ARCHIVE_DAYS", "365"),
            ("LOG_BATCH_INTERVAL_MS", "250"),
        ]));
        assert_eq!(p.min_level, LogLevel::Error);
        assert!(!p.batching_enabled);
        assert_eq!(p.batch_size, 7);
        assert_eq!(p.archive_days, 365);
        assert_eq!(p.batch_interval_ms, 250);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let p = LogPolicy::from_lookup(lookup(&[
            ("APP_ENV", "staging"),
            ("LOG_LEVEL", "loud"),
            ("LOG_BATCH_SIZE", "0"),
            ("LOG_ARCHIVE_DAYS", "-1"),
        ]));
        assert_eq!(p.min_level, LogLevel::Info);
        assert_eq!(p.batch_size, 50);
        assert_eq!(p.archive_days, 60);

        let p = LogPolicy::from_lookup(lookup(&[("LOG_LEVEL", "9"), ("APP_ENV", "moon")]));
        assert_eq!(p.environment, Environment::Development);
        assert_eq!(p.min_level, LogLevel::Debug);
    }

    #[test]
    fn batch_flag_only_accepts_literal_true() {
        let on = LogPolicy::from_lookup(lookup(&[("LOG_BATCH_ENABLED", "true")]));
        assert!(on.batching_enabled);
        let off = LogPolicy::from_lookup(lookup(&[("APP_ENV", "production"), ("LOG_BATCH_ENABLED", "yes")]));
        assert!(!off.batching_enabled);
    }

    #[test]
    fn should_log_matches_level_ordering() {
        let levels = [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error];
        for min in levels {
            let mut p = LogPolicy::for_environment(Environment::Development);
            p.min_level = min;
            for l in levels {
                assert_eq!(p.should_log(l), l >= min, "min={:?} level={:?}", min, l);
            }
        }
        let mut off = LogPolicy::for_environment(Environment::Development);
        off.min_level = LogLevel::Off;
        assert!(!off.should_log(LogLevel::Error));
        assert!(!off.should_log(LogLevel::Off));
    }

    #[test]
    fn action_and_resource_exclusions() {
        let p = LogPolicy::for_environment(Environment::Production);
        assert!(!p.should_log_action(ActivityAction::View, ResourceType::BoardPost));
        assert!(!p.should_log_action(ActivityAction::Create, ResourceType::Draft));
        assert!(p.should_log_action(ActivityAction::Create, ResourceType::BoardPost));
    }

    #[test]
    #[serial]
    fn policy_reads_process_env() {
        env::set_var("APP_ENV", "production");
        env::set_var("LOG_BATCH_SIZE", "12");
        let p = LogPolicy::from_env();
        assert_eq!(p.environment, Environment::Production);
        assert_eq!(p.batch_size, 12);
        env::remove_var("APP_ENV");
        env::remove_var("LOG_BATCH_SIZE");
    }

    #[test]
    #[serial]
    fn service_config_defaults_and_validation() {
        env::remove_var("SERVICE_ID");
        env::remove_var("DATABASE_URL");
        env::remove_var("HTTP_BIND");
        env::remove_var("DB_MAX_CONNECTIONS");
        env::remove_var("SECURITY_SWEEP_INTERVAL_MS");
        env::remove_var("API_TOKEN");
        assert!(ServiceConfig::from_env().is_err());

        env::set_var("API_TOKEN", "s3cret-token");
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.http_bind, "0.0.0.0:9091");
        assert_eq!(config.db_max_connections, 5);
        assert!(config.service_id.starts_with("activity-logd-"));

        env::set_var("DB_MAX_CONNECTIONS", "0");
        assert!(ServiceConfig::from_env().is_err());
        env::remove_var("DB_MAX_CONNECTIONS");

        env::set_var("DATABASE_URL", "mysql://nope");
        assert!(ServiceConfig::from_env().is_err());
        env::remove_var("DATABASE_URL");

        env::set_var("SECURITY_SWEEP_INTERVAL_MS", "10");
        assert!(ServiceConfig::from_env().is_err());
        env::remove_var("SECURITY_SWEEP_INTERVAL_MS");
        env::remove_var("API_TOKEN");
    }
}
