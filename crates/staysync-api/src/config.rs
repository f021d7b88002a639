use std::collections::HashMap;
use std::env;
use std::fmt;

use staysync_core::token::MIN_SECRET_LEN;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `SQLite` file, or `:memory:`
    pub database_path: String,
    pub token_secret: String,
    /// Base used to turn feed paths into absolute URLs
    pub public_base_url: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("token_secret", &"[REDACTED]")
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STAYSYNC_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "STAYSYNC_DATABASE_PATH", "staysync.db");

        let token_secret = required_trimmed(&lookup, "STAYSYNC_TOKEN_SECRET")?;
        if token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "STAYSYNC_TOKEN_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        let public_base_url = optional_trimmed(&lookup, "STAYSYNC_PUBLIC_BASE_URL")
            .map(|value| trim_trailing(&value).to_string());
        if let Some(url) = public_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "STAYSYNC_PUBLIC_BASE_URL must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(Self {
            bind_addr,
            database_path,
            token_secret,
            public_base_url,
        })
    }

    /// Public location of a feed path
    pub fn feed_url(&self, path: &str) -> String {
        match self.public_base_url.as_deref() {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "sensitive-feed-secret-0123456789abcdef";

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_token_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("STAYSYNC_TOKEN_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let map = HashMap::from([("STAYSYNC_TOKEN_SECRET", "short")]);
        assert!(matches!(config_from(&map), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([("STAYSYNC_TOKEN_SECRET", SECRET)]);
        let config = config_from(&map).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "staysync.db");
        assert_eq!(config.public_base_url, None);
        assert_eq!(config.feed_url("/ics/abc.ics"), "/ics/abc.ics");
    }

    #[test]
    fn config_normalizes_public_base_url() {
        let map = HashMap::from([
            ("STAYSYNC_TOKEN_SECRET", SECRET),
            ("STAYSYNC_PUBLIC_BASE_URL", " https://sync.example.com/ "),
            ("STAYSYNC_DATABASE_PATH", ":memory:"),
        ]);
        let config = config_from(&map).unwrap();
        assert_eq!(
            config.feed_url("/ics/abc.ics"),
            "https://sync.example.com/ics/abc.ics"
        );
        assert_eq!(config.database_path, ":memory:");

        let map = HashMap::from([
            ("STAYSYNC_TOKEN_SECRET", SECRET),
            ("STAYSYNC_PUBLIC_BASE_URL", "sync.example.com"),
        ]);
        assert!(matches!(config_from(&map), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let map = HashMap::from([("STAYSYNC_TOKEN_SECRET", SECRET)]);
        let config = config_from(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(SECRET));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
