use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub id: String,
    pub env: String,
    pub config_version: u32,

    pub feed_types: Vec<FeedTypeConfig>,
    pub store: StoreConfig,
    pub ftp: FtpConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTypeConfig {
    pub name: String,
    /// Name of the environment variable that holds the source database DSN.
    pub dsn_env: String,
    pub count_query: String,
    pub select_query: String,
    pub size_limit_bytes: usize,
    pub line_limit: usize,
    pub destination_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Name of the environment variable that holds the Redis connection URL.
    pub url_env: String,
    pub keepalive_interval_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user_env: String,
    pub password_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub subscriber_ping_interval_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    pub fn load() -> AppResult<Self> {
        let path =
            env::var("FEED_FORGE_CONFIG").unwrap_or_else(|_| "src/config/app.toml".to_string());

        let raw = fs::read_to_string(&path)?;
        let cfg: Self = toml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.id.is_empty() {
            return Err(AppError::MissingConfig("id"));
        }
        if self.config_version == 0 {
            return Err(AppError::InvalidConfig(
                "config_version must be >= 1".into(),
            ));
        }
        if self.feed_types.is_empty() {
            return Err(AppError::InvalidConfig(
                "app.toml: must define at least one [[feed_types]]".into(),
            ));
        }

        let mut seen_names = HashSet::new();
        for (i, ft) in self.feed_types.iter().enumerate() {
            let prefix = format!("app.toml: feed_types[{i}]");

            if ft.name.trim().is_empty() {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: name must not be empty"
                )));
            }
            if !seen_names.insert(ft.name.clone()) {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: duplicate feed type name '{}'",
                    ft.name
                )));
            }
            if ft.dsn_env.trim().is_empty() {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: dsn_env must not be empty"
                )));
            }
            let dsn = env::var(&ft.dsn_env).map_err(|_| {
                AppError::InvalidConfig(format!(
                    "{prefix}: environment variable '{}' is not set",
                    ft.dsn_env
                ))
            })?;
            if !dsn.starts_with("postgres://") && !dsn.starts_with("postgresql://") {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: DSN from env var '{}' must start with postgres:// or postgresql://",
                    ft.dsn_env
                )));
            }
            if ft.count_query.trim().is_empty() || ft.select_query.trim().is_empty() {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: count_query and select_query must not be empty"
                )));
            }
            if ft.size_limit_bytes == 0 {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: size_limit_bytes must be > 0"
                )));
            }
            if ft.destination_dir.trim().is_empty() {
                return Err(AppError::InvalidConfig(format!(
                    "{prefix}: destination_dir must not be empty"
                )));
            }
            // line_limit == 0 is legal (RECORD_OVERFLOWS_LIMITS on first record);
            // it is a pathological config, not an invalid one.
        }

        if self.store.url_env.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "app.toml: store.url_env must not be empty".into(),
            ));
        }
        env::var(&self.store.url_env).map_err(|_| {
            AppError::InvalidConfig(format!(
                "app.toml: environment variable '{}' is not set",
                self.store.url_env
            ))
        })?;
        if self.store.keepalive_interval_sec == 0 {
            return Err(AppError::InvalidConfig(
                "app.toml: store.keepalive_interval_sec must be > 0".into(),
            ));
        }

        if self.ftp.host.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "app.toml: ftp.host must not be empty".into(),
            ));
        }
        for env_var in [&self.ftp.user_env, &self.ftp.password_env] {
            if env::var(env_var).is_err() {
                return Err(AppError::InvalidConfig(format!(
                    "app.toml: environment variable '{env_var}' is not set"
                )));
            }
        }

        if self.http.bind_addr.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "app.toml: http.bind_addr must not be empty".into(),
            ));
        }
        if self.http.subscriber_ping_interval_sec == 0 {
            return Err(AppError::InvalidConfig(
                "app.toml: http.subscriber_ping_interval_sec must be > 0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            id: "feed-forge".into(),
            env: "test".into(),
            config_version: 1,
            feed_types: vec![FeedTypeConfig {
                name: "orders".into(),
                dsn_env: "FEED_FORGE_TEST_DSN".into(),
                count_query: "select count(*) from orders".into(),
                select_query: "select * from orders".into(),
                size_limit_bytes: 1_000_000,
                line_limit: 10_000,
                destination_dir: "orders".into(),
            }],
            store: StoreConfig {
                url_env: "FEED_FORGE_TEST_REDIS".into(),
                keepalive_interval_sec: 3,
            },
            ftp: FtpConfig {
                host: "ftp.example.com".into(),
                port: 21,
                user_env: "FEED_FORGE_TEST_FTP_USER".into(),
                password_env: "FEED_FORGE_TEST_FTP_PASSWORD".into(),
            },
            http: HttpConfig {
                bind_addr: "0.0.0.0:8080".into(),
                subscriber_ping_interval_sec: 1,
            },
            logging: LoggingConfig {
                level: "info".into(),
            },
        }
    }

    #[test]
    fn rejects_duplicate_feed_type_names() {
        unsafe {
            std::env::set_var("FEED_FORGE_TEST_DSN", "postgres://localhost/db");
            std::env::set_var("FEED_FORGE_TEST_REDIS", "redis://localhost");
            std::env::set_var("FEED_FORGE_TEST_FTP_USER", "u");
            std::env::set_var("FEED_FORGE_TEST_FTP_PASSWORD", "p");
        }
        let mut cfg = sample();
        let dup = cfg.feed_types[0].clone();
        cfg.feed_types.push(dup);
        assert!(matches!(cfg.validate(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn accepts_zero_line_limit_as_pathological_but_valid() {
        unsafe {
            std::env::set_var("FEED_FORGE_TEST_DSN", "postgres://localhost/db");
            std::env::set_var("FEED_FORGE_TEST_REDIS", "redis://localhost");
            std::env::set_var("FEED_FORGE_TEST_FTP_USER", "u");
            std::env::set_var("FEED_FORGE_TEST_FTP_PASSWORD", "p");
        }
        let mut cfg = sample();
        cfg.feed_types[0].line_limit = 0;
        assert!(cfg.validate().is_ok());
    }
}
