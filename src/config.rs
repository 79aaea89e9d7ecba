use crate::domain::AccountingMethod;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Lot-matching method applied when a sell carries no explicit plan.
    pub default_method: AccountingMethod,
    /// Wash-sale window on each side of a loss's close date. US rule: 30.
    pub wash_window_days: i64,
    /// Held strictly longer than this is long-term. US rule: 365.
    pub long_term_threshold_days: i64,
    /// Accounts covered by full-reconciliation passes.
    pub accounts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let default_method = {
            let raw = env_map
                .get("ACCOUNTING_METHOD")
                .map(|s| s.as_str())
                .unwrap_or("fifo");
            AccountingMethod::parse(raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "ACCOUNTING_METHOD".to_string(),
                    format!("must be fifo, lifo, or specific, got {}", raw),
                )
            })?
        };

        let wash_window_days = parse_positive_days(&env_map, "WASH_WINDOW_DAYS", "30")?;
        let long_term_threshold_days =
            parse_positive_days(&env_map, "LONG_TERM_THRESHOLD_DAYS", "365")?;

        let accounts = parse_accounts_from_map(&env_map)?;

        Ok(Config {
            database_path,
            default_method,
            wash_window_days,
            long_term_threshold_days,
            accounts,
        })
    }
}

fn parse_positive_days(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<i64, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    let days = raw.parse::<i64>().map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), "must be a valid i64".to_string())
    })?;
    if days <= 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be positive, got {}", days),
        ));
    }
    Ok(days)
}

fn parse_accounts_from_map(env_map: &HashMap<String, String>) -> Result<Vec<String>, ConfigError> {
    if let Some(accounts_str) = env_map.get("ACCOUNTS") {
        Ok(accounts_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else if let Some(file_path) = env_map.get("ACCOUNTS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "ACCOUNTS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        Ok(content
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    } else {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.default_method, AccountingMethod::Fifo);
        assert_eq!(config.wash_window_days, 30);
        assert_eq!(config.long_term_threshold_days, 365);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_accounting_method() {
        let mut env_map = setup_required_env();
        env_map.insert("ACCOUNTING_METHOD".to_string(), "hifo".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ACCOUNTING_METHOD"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_lifo_method_accepted() {
        let mut env_map = setup_required_env();
        env_map.insert("ACCOUNTING_METHOD".to_string(), "lifo".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.default_method, AccountingMethod::Lifo);
    }

    #[test]
    fn test_invalid_window_days() {
        let mut env_map = setup_required_env();
        env_map.insert("WASH_WINDOW_DAYS".to_string(), "-5".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "WASH_WINDOW_DAYS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_accounts_inline_list() {
        let mut env_map = setup_required_env();
        env_map.insert("ACCOUNTS".to_string(), "acct-1, acct-2,,acct-3".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.accounts, vec!["acct-1", "acct-2", "acct-3"]);
    }

    #[test]
    fn test_accounts_file_missing() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "ACCOUNTS_FILE".to_string(),
            "/nonexistent/accounts.txt".to_string(),
        );
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ACCOUNTS_FILE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
