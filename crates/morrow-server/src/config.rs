use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Server configuration, read from `MORROW_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timeout_ms: u64 = var("MORROW_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("MORROW_REQUEST_TIMEOUT_MS must be a number of milliseconds")?;

        Ok(Self {
            db_path: PathBuf::from(var("MORROW_DB_PATH").unwrap_or_else(|| "morrow.db".into())),
            host: var("MORROW_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("MORROW_PORT")
                .unwrap_or_else(|| "8080".into())
                .parse()
                .context("MORROW_PORT must be a valid port number")?,
            request_timeout: Duration::from_millis(timeout_ms),
            environment: var("MORROW_ENV").unwrap_or_else(|| "development".into()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            bail!("MORROW_DB_PATH must not be empty");
        }
        if self.port == 0 {
            bail!("MORROW_PORT must not be 0");
        }
        if self.request_timeout.is_zero() {
            bail!("MORROW_REQUEST_TIMEOUT_MS must be greater than 0");
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
