//! Process configuration.
//!
//! Read once at startup from `NEURAL_REVIEW_*` environment variables, after
//! loading a `.env` file if one exists. Unset variables take the defaults in
//! [`Config::default`]; set but unparseable ones are an error.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

use crate::analysis::PipelineConfig;
use crate::dedupe::{DEFAULT_CAPACITY, DEFAULT_RETENTION_HOURS};
use crate::github::DEFAULT_API_BASE;
use crate::orchestrator::{
    DEFAULT_EVENT_TIMEOUT, DEFAULT_MAX_EVENT_ATTEMPTS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKER_POOL_SIZE, OrchestratorConfig,
};

const PREFIX: &str = "NEURAL_REVIEW_";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(String),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the GitHub App private key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKey {
    Inline(String),
    Path(PathBuf),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKey::Inline(_) => f.write_str("Inline(<redacted>)"),
            PrivateKey::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

impl PrivateKey {
    /// The PEM bytes, reading the file if the key is given by path.
    pub fn pem(&self) -> Result<Vec<u8>, ConfigError> {
        match self {
            // Single-line env values often carry escaped newlines.
            PrivateKey::Inline(pem) => Ok(pem.replace("\\n", "\n").into_bytes()),
            PrivateKey::Path(path) => std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub webhook_secret: String,
    pub app_id: u64,
    pub private_key: PrivateKey,
    pub api_base: String,
    pub listen_addr: SocketAddr,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub dedupe_retention_hours: i64,
    pub dedupe_capacity: usize,
    pub event_timeout: Duration,
    pub max_event_attempts: u32,
    pub stage_timeout: Duration,
    pub max_file_additions: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("webhook_secret", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("private_key", &self.private_key)
            .field("api_base", &self.api_base)
            .field("listen_addr", &self.listen_addr)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("dedupe_retention_hours", &self.dedupe_retention_hours)
            .field("dedupe_capacity", &self.dedupe_capacity)
            .field("event_timeout", &self.event_timeout)
            .field("max_event_attempts", &self.max_event_attempts)
            .field("stage_timeout", &self.stage_timeout)
            .field("max_file_additions", &self.max_file_additions)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Config {
            webhook_secret: String::new(),
            app_id: 0,
            private_key: PrivateKey::Inline(String::new()),
            api_base: DEFAULT_API_BASE.to_string(),
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dedupe_retention_hours: DEFAULT_RETENTION_HOURS,
            dedupe_capacity: DEFAULT_CAPACITY,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            max_event_attempts: DEFAULT_MAX_EVENT_ATTEMPTS,
            stage_timeout: pipeline.stage_timeout,
            max_file_additions: pipeline.max_file_additions,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case in production.
        let _ = dotenvy::dotenv();
        Config::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let defaults = Config::default();

        let private_key = match (vars.get("PRIVATE_KEY"), vars.get("PRIVATE_KEY_PATH")) {
            (Some(pem), _) => PrivateKey::Inline(pem),
            (None, Some(path)) => PrivateKey::Path(PathBuf::from(path)),
            (None, None) => return Err(ConfigError::Missing(format!("{PREFIX}PRIVATE_KEY"))),
        };

        let listen_addr = match vars.get("LISTEN_ADDR") {
            Some(addr) => parse(&format!("{PREFIX}LISTEN_ADDR"), addr)?,
            None => match (vars.lookup)("PORT") {
                Some(port) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, parse("PORT", port)?)),
                None => defaults.listen_addr,
            },
        };

        Ok(Config {
            webhook_secret: vars.required("WEBHOOK_SECRET")?,
            app_id: vars.parse_required("APP_ID")?,
            private_key,
            api_base: vars.get("API_BASE").unwrap_or(defaults.api_base),
            listen_addr,
            worker_pool_size: vars.positive("WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            queue_capacity: vars.positive("QUEUE_CAPACITY", defaults.queue_capacity)?,
            dedupe_retention_hours: vars
                .positive("DEDUPE_RETENTION_HOURS", defaults.dedupe_retention_hours)?,
            dedupe_capacity: vars.positive("DEDUPE_CAPACITY", defaults.dedupe_capacity)?,
            event_timeout: Duration::from_secs(
                vars.positive("EVENT_TIMEOUT_SECS", defaults.event_timeout.as_secs())?,
            ),
            max_event_attempts: vars.positive("MAX_EVENT_ATTEMPTS", defaults.max_event_attempts)?,
            stage_timeout: Duration::from_secs(
                vars.positive("STAGE_TIMEOUT_SECS", defaults.stage_timeout.as_secs())?,
            ),
            max_file_additions: vars.positive("MAX_FILE_ADDITIONS", defaults.max_file_additions)?,
        })
    }

    pub fn dedupe_retention(&self) -> TimeDelta {
        TimeDelta::hours(self.dedupe_retention_hours)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            worker_pool_size: self.worker_pool_size,
            event_timeout: self.event_timeout,
            max_event_attempts: self.max_event_attempts,
            completed_retention: self.dedupe_retention(),
            completed_capacity: self.dedupe_capacity,
            pipeline: PipelineConfig {
                stage_timeout: self.stage_timeout,
                max_file_additions: self.max_file_additions,
            },
            ..defaults
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, suffix: &str) -> Result<String, ConfigError> {
        self.get(suffix)
            .ok_or_else(|| ConfigError::Missing(format!("{PREFIX}{suffix}")))
    }

    fn parse_required<T: FromStr>(&self, suffix: &str) -> Result<T, ConfigError> {
        parse(&format!("{PREFIX}{suffix}"), self.required(suffix)?)
    }

    /// An optional number that must be greater than zero.
    fn positive<T>(&self, suffix: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let var = format!("{PREFIX}{suffix}");
        match self.get(suffix) {
            None => Ok(default),
            Some(raw) => {
                let value: T = parse(&var, raw.clone())?;
                if value > T::default() {
                    Ok(value)
                } else {
                    Err(ConfigError::Invalid { var, value: raw })
                }
            }
        }
    }
}

fn parse<T: FromStr>(var: &str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        value: raw,
    })
}
