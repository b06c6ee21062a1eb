use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Duration;

use renteasy_auth::TokenConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "access-secret",
    "refresh-secret",
];

#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub tokens: TokenConfig,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("RENTEASY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("RENTEASY_PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .context("RENTEASY_PORT must be a port number")?;
        let db_path: PathBuf = var("RENTEASY_DB_PATH")
            .unwrap_or_else(|| "renteasy.db".into())
            .into();

        let access_secret = required_secret(var("RENTEASY_JWT_ACCESS_SECRET"), "RENTEASY_JWT_ACCESS_SECRET")?;
        let refresh_secret = required_secret(var("RENTEASY_JWT_REFRESH_SECRET"), "RENTEASY_JWT_REFRESH_SECRET")?;
        if access_secret == refresh_secret {
            bail!("RENTEASY_JWT_ACCESS_SECRET and RENTEASY_JWT_REFRESH_SECRET must differ");
        }

        let access_ttl = ttl_secs(
            var("RENTEASY_JWT_ACCESS_TTL_SECS"),
            "RENTEASY_JWT_ACCESS_TTL_SECS",
            TokenConfig::DEFAULT_ACCESS_TTL_SECS,
        )?;
        let refresh_ttl = ttl_secs(
            var("RENTEASY_JWT_REFRESH_TTL_SECS"),
            "RENTEASY_JWT_REFRESH_TTL_SECS",
            TokenConfig::DEFAULT_REFRESH_TTL_SECS,
        )?;

        let allowed_origins = var("RENTEASY_ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let secure_cookies = matches!(
            var("RENTEASY_SECURE_COOKIES").as_deref(),
            Some("1" | "true" | "yes")
        );

        Ok(Self {
            host,
            port,
            db_path,
            tokens: TokenConfig {
                access_secret,
                refresh_secret,
                access_ttl,
                refresh_ttl,
            },
            allowed_origins,
            secure_cookies,
        })
    }
}

fn required_secret(value: Option<String>, key: &str) -> anyhow::Result<String> {
    match value {
        Some(secret) if !PLACEHOLDER_SECRETS.contains(&secret.as_str()) => Ok(secret),
        _ => bail!("{} is unset or still a placeholder", key),
    }
}

fn ttl_secs(value: Option<String>, key: &str, default: i64) -> anyhow::Result<Duration> {
    let secs = match value {
        Some(v) => v
            .parse::<i64>()
            .with_context(|| format!("{} must be a whole number of seconds", key))?,
        None => default,
    };
    if secs <= 0 {
        bail!("{} must be positive", key);
    }
    Duration::try_seconds(secs).with_context(|| format!("{} is out of range", key))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const SECRETS: [(&str, &str); 2] = [
        ("RENTEASY_JWT_ACCESS_SECRET", "a-long-random-access-secret"),
        ("RENTEASY_JWT_REFRESH_SECRET", "a-long-random-refresh-secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&SECRETS).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("renteasy.db"));
        assert_eq!(config.tokens.access_ttl, Duration::minutes(15));
        assert_eq!(config.tokens.refresh_ttl, Duration::days(7));
        assert!(config.allowed_origins.is_empty());
        assert!(!config.secure_cookies);
    }

    #[test]
    fn overrides_are_read() {
        let mut pairs = SECRETS.to_vec();
        pairs.extend([
            ("RENTEASY_PORT", "9000"),
            ("RENTEASY_JWT_ACCESS_TTL_SECS", "60"),
            ("RENTEASY_ALLOWED_ORIGINS", "https://renteasy.app, http://localhost:5173"),
            ("RENTEASY_SECURE_COOKIES", "true"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.tokens.access_ttl, Duration::seconds(60));
        assert_eq!(
            config.allowed_origins,
            ["https://renteasy.app", "http://localhost:5173"]
        );
        assert!(config.secure_cookies);
    }

    #[test]
    fn missing_or_placeholder_secret_aborts() {
        assert!(load(&[]).is_err());
        assert!(
            load(&[
                ("RENTEASY_JWT_ACCESS_SECRET", "dev-secret-change-me"),
                ("RENTEASY_JWT_REFRESH_SECRET", "a-long-random-refresh-secret"),
            ])
            .is_err()
        );
    }

    #[test]
    fn shared_secret_aborts() {
        let err = load(&[
            ("RENTEASY_JWT_ACCESS_SECRET", "same-secret-for-both"),
            ("RENTEASY_JWT_REFRESH_SECRET", "same-secret-for-both"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn bad_ttl_aborts() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("RENTEASY_JWT_REFRESH_TTL_SECS", "-5"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn oversized_ttl_aborts() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("RENTEASY_JWT_ACCESS_TTL_SECS", "9223372036854775807"));
        let err = load(&pairs).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
