use std::str::FromStr;
use std::time::Duration;

use pagebench_core::options::{TestOptions, DEFAULT_LOCATION};
use pagebench_pipeline::{PipelineConfig, SweepConfig};
use pagebench_remote::PollConfig;

/// A configuration variable that is set but cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be a valid {expected}, got {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against the
/// public benchmark service with an in-memory store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// PostgreSQL URL. Records are kept in memory when unset.
    pub database_url: Option<String>,
    /// Base URL of the remote benchmark service.
    pub benchmark_api_url: String,
    pub benchmark_api_key: Option<String>,
    /// Test agent location used when a request names none.
    pub benchmark_location: String,
    /// Public URL of this server's `/pingback`, sent with every submission.
    pub pingback_url: Option<String>,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub sweep_interval_secs: u64,
    pub stale_after_secs: u64,
    pub abandon_after_secs: u64,
    pub max_run_retries: u32,
    pub aux_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            request_timeout_secs: 30,
            database_url: None,
            benchmark_api_url: "https://www.webpagetest.org".into(),
            benchmark_api_key: None,
            benchmark_location: DEFAULT_LOCATION.into(),
            pingback_url: None,
            poll_interval_secs: 120,
            poll_max_attempts: 10,
            sweep_interval_secs: 60,
            stale_after_secs: 300,
            abandon_after_secs: 86_400,
            max_run_retries: 12,
            aux_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                       |
    /// |------------------------|-------------------------------|
    /// | `HOST`                 | `0.0.0.0`                     |
    /// | `PORT`                 | `3000`                        |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                          |
    /// | `DATABASE_URL`         | unset (in-memory store)       |
    /// | `BENCHMARK_API_URL`    | `https://www.webpagetest.org` |
    /// | `BENCHMARK_API_KEY`    | unset                         |
    /// | `BENCHMARK_LOCATION`   | `Dulles:Chrome`               |
    /// | `PINGBACK_URL`         | unset (fallback polling only) |
    /// | `POLL_INTERVAL_SECS`   | `120`                         |
    /// | `POLL_MAX_ATTEMPTS`    | `10`                          |
    /// | `SWEEP_INTERVAL_SECS`  | `60`                          |
    /// | `STALE_AFTER_SECS`     | `300`                         |
    /// | `ABANDON_AFTER_SECS`   | `86400`                       |
    /// | `MAX_RUN_RETRIES`      | `12`                          |
    /// | `AUX_TIMEOUT_SECS`     | `10`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port, "port number")?,
            request_timeout_secs: parse(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
                "number of seconds",
            )?,
            database_url: get("DATABASE_URL"),
            benchmark_api_url: get("BENCHMARK_API_URL").unwrap_or(defaults.benchmark_api_url),
            benchmark_api_key: get("BENCHMARK_API_KEY"),
            benchmark_location: get("BENCHMARK_LOCATION").unwrap_or(defaults.benchmark_location),
            pingback_url: get("PINGBACK_URL"),
            poll_interval_secs: parse(
                &get,
                "POLL_INTERVAL_SECS",
                defaults.poll_interval_secs,
                "number of seconds",
            )?,
            poll_max_attempts: parse(
                &get,
                "POLL_MAX_ATTEMPTS",
                defaults.poll_max_attempts,
                "attempt count",
            )?,
            sweep_interval_secs: parse(
                &get,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
                "number of seconds",
            )?,
            stale_after_secs: parse(
                &get,
                "STALE_AFTER_SECS",
                defaults.stale_after_secs,
                "number of seconds",
            )?,
            abandon_after_secs: parse(
                &get,
                "ABANDON_AFTER_SECS",
                defaults.abandon_after_secs,
                "number of seconds",
            )?,
            max_run_retries: parse(
                &get,
                "MAX_RUN_RETRIES",
                defaults.max_run_retries,
                "retry count",
            )?,
            aux_timeout_secs: parse(
                &get,
                "AUX_TIMEOUT_SECS",
                defaults.aux_timeout_secs,
                "number of seconds",
            )?,
        })
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            stale_after: Duration::from_secs(self.stale_after_secs),
            abandon_after: Duration::from_secs(self.abandon_after_secs),
            max_run_retries: self.max_run_retries,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            aux_timeout: Duration::from_secs(self.aux_timeout_secs),
            ..PipelineConfig::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Options applied to requests that do not carry their own.
    pub fn default_options(&self) -> TestOptions {
        TestOptions {
            location: self.benchmark_location.clone(),
            ..TestOptions::default()
        }
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            var,
            expected,
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert_eq!(config.poll_config().max_attempts, 10);
        assert_eq!(config.poll_config().interval, Duration::from_secs(120));
        assert_eq!(config.sweep_config().max_run_retries, 12);
    }

    #[test]
    fn variables_override_defaults() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/pagebench"),
            ("POLL_MAX_ATTEMPTS", "3"),
            ("BENCHMARK_LOCATION", "London:Firefox"),
            ("PINGBACK_URL", ""),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/pagebench"));
        assert_eq!(config.poll_max_attempts, 3);
        assert_eq!(config.default_options().location, "London:Firefox");
        assert!(config.pingback_url.is_none());
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = from_pairs(&[("STALE_AFTER_SECS", "soon")]).unwrap_err();
        assert_matches!(err, ConfigError { var: "STALE_AFTER_SECS", .. });
        assert!(err.to_string().contains("soon"));
    }
}
