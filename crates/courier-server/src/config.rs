use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Server settings, read from `COURIER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub download_ttl: Duration,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset and empty values
    /// fall back to defaults; malformed numbers are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("COURIER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("COURIER_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = parse_or(get("COURIER_PORT"), "COURIER_PORT", 8000u16)?;
        let ttl_minutes = parse_or(get("COURIER_TOKEN_TTL_MINUTES"), "COURIER_TOKEN_TTL_MINUTES", 600i64)?;
        if ttl_minutes <= 0 {
            bail!("COURIER_TOKEN_TTL_MINUTES must be positive");
        }
        let token_ttl = chrono::Duration::try_minutes(ttl_minutes)
            .context("COURIER_TOKEN_TTL_MINUTES is out of range")?;
        let download_secs = parse_or(get("COURIER_DOWNLOAD_TTL_SECS"), "COURIER_DOWNLOAD_TTL_SECS", 3600u64)?;
        if download_secs == 0 {
            bail!("COURIER_DOWNLOAD_TTL_SECS must be positive");
        }
        let max_upload_mb = parse_or(get("COURIER_MAX_UPLOAD_MB"), "COURIER_MAX_UPLOAD_MB", 50usize)?;

        let cors_origins = get("COURIER_CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.into())
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            host: get("COURIER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("COURIER_DB_PATH").unwrap_or_else(|| "courier.db".into()).into(),
            jwt_secret,
            token_ttl,
            storage_dir: get("COURIER_STORAGE_DIR")
                .unwrap_or_else(|| "./courier-storage".into())
                .into(),
            public_url: get("COURIER_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:8000".into())
                .trim_end_matches('/')
                .to_string(),
            download_ttl: Duration::from_secs(download_secs),
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            cors_origins,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v.trim().parse().with_context(|| format!("{} is not a valid number: {:?}", key, v)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = config(&[("COURIER_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.db_path, PathBuf::from("courier.db"));
        assert_eq!(cfg.token_ttl, chrono::Duration::minutes(600));
        assert_eq!(cfg.download_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.public_url, "http://localhost:8000");
        assert_eq!(cfg.cors_origins, vec!["http://localhost:3000", "http://127.0.0.1:3000"]);
        assert_eq!(cfg.addr().unwrap().port(), 8000);
    }

    #[test]
    fn missing_or_placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "  ")]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("COURIER_JWT_SECRET", "s3cret"),
            ("COURIER_PORT", "9001"),
            ("COURIER_TOKEN_TTL_MINUTES", "15"),
            ("COURIER_PUBLIC_URL", "https://chat.example.com/"),
            ("COURIER_MAX_UPLOAD_MB", "2"),
            ("COURIER_CORS_ORIGINS", "https://a.example.com, ,https://b.example.com"),
        ])
        .unwrap();

        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.token_ttl, chrono::Duration::minutes(15));
        assert_eq!(cfg.public_url, "https://chat.example.com");
        assert_eq!(cfg.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.cors_origins, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(config(&[("COURIER_JWT_SECRET", "s3cret"), ("COURIER_PORT", "eighty")]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "s3cret"), ("COURIER_TOKEN_TTL_MINUTES", "0")]).is_err());
        assert!(config(&[("COURIER_JWT_SECRET", "s3cret"), ("COURIER_DOWNLOAD_TTL_SECS", "-5")]).is_err());
        assert!(
            config(&[("COURIER_JWT_SECRET", "s3cret"), ("COURIER_TOKEN_TTL_MINUTES", "9223372036854775807")])
                .is_err()
        );
    }
}
