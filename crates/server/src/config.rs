use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use payclaim_core::{Money, AMOUNT_TOLERANCE_CENTS, CANDIDATE_LIMIT};
use payclaim_ingest::DEFAULT_GEMINI_MODEL;
use payclaim_storage::{DbOptions, VerifyConfig};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE: &str = "payclaim.toml";
pub const DB_FILE: &str = "payclaim.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub verification: VerificationConfig,
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `payclaim.db` in the data directory.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let defaults = DbOptions::default();
        DatabaseConfig {
            path: None,
            max_connections: defaults.max_connections,
            busy_timeout_ms: defaults.busy_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub amount_tolerance: Money,
    pub candidate_limit: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        VerificationConfig {
            amount_tolerance: Money::from_cents(AMOUNT_TOLERANCE_CENTS),
            candidate_limit: CANDIDATE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
        }
    }
}

pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "payclaim", "payclaim")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// File named by `PAYCLAIM_CONFIG`, else `<data dir>/payclaim.toml`,
    /// then environment overrides. A missing file means defaults.
    pub fn load() -> Result<Config, ConfigError> {
        let path = std::env::var_os("PAYCLAIM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join(CONFIG_FILE));
        let mut config = Config::from_file(&path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Config::parse(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Config::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(raw: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(bind) = get("PAYCLAIM_BIND") {
            self.server.bind = bind.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PAYCLAIM_BIND",
                value: bind.clone(),
            })?;
        }
        if let Some(db) = get("PAYCLAIM_DB").filter(|v| !v.is_empty()) {
            self.database.path = Some(PathBuf::from(db));
        }
        if let Some(key) = get("GEMINI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.fallback.api_key = Some(key);
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| data_dir().join(DB_FILE))
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            max_connections: self.database.max_connections,
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
        }
    }

    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            tolerance: self.verification.amount_tolerance,
            candidate_limit: self.verification.candidate_limit.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind.port(), 3001);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.verification.amount_tolerance, Money::from_cents(10));
        assert_eq!(config.verification.candidate_limit, 10);
        assert_eq!(config.fallback.model, DEFAULT_GEMINI_MODEL);
        assert!(config.fallback.api_key.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [server]
            bind = "0.0.0.0:8080"

            [database]
            path = "/tmp/claims.db"
            busy_timeout_ms = 250

            [verification]
            amount_tolerance = 0.5
            candidate_limit = 3

            [fallback]
            api_key = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/claims.db"));
        assert_eq!(config.db_options().busy_timeout, Duration::from_millis(250));
        assert_eq!(config.verify_config().tolerance, Money::from_cents(50));
        assert_eq!(config.verify_config().candidate_limit, 3);
        assert_eq!(config.fallback.api_key.as_deref(), Some("abc"));
        assert_eq!(config.fallback.model, DEFAULT_GEMINI_MODEL);
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("PAYCLAIM_BIND", "127.0.0.1:9000"),
            ("PAYCLAIM_DB", "/var/lib/payclaim/x.db"),
            ("GEMINI_API_KEY", "key-from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/payclaim/x.db"));
        assert_eq!(config.fallback.api_key.as_deref(), Some("key-from-env"));
    }

    #[test]
    fn bad_bind_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|var| (var == "PAYCLAIM_BIND").then(|| "not-an-addr".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "PAYCLAIM_BIND", .. }));
    }

    #[test]
    fn missing_file_is_default_and_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::from_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(missing.server.bind.port(), 3001);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[server\nbind = 1").unwrap();
        assert!(matches!(Config::from_file(&bad), Err(ConfigError::Parse { .. })));
    }
}
