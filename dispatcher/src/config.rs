//! Dispatcher configuration — loaded from environment variables once at startup.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::command_builder::{self, BuildError};

/// Everything the dispatcher needs besides the listen address.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub endpoint: EndpointConfig,
    pub validator: ValidatorConfig,
    pub command: CommandConfig,
    pub policy: DispatchPolicy,
}

#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Route the webhook is served on.
    pub path: String,
    /// Webhook secret for HMAC validation. Empty disables the check.
    pub webhook_secret: String,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// `Retry-After` hint sent with 429 responses.
    pub retry_after_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Clone URL prefixes that are trusted (`git@`, `ssh://`, ...).
    pub allowed_sources: Vec<String>,
    /// Clone URL hosts that are trusted. Empty accepts any host.
    pub allowed_hosts: Vec<String>,
    /// Whether `refs/tags/*` pushes trigger builds.
    pub allow_tags: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allowed_sources: vec!["git@".to_string(), "ssh://".to_string()],
            allowed_hosts: Vec::new(),
            allow_tags: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommandConfig {
    /// Absolute path of the build executable.
    pub script_path: PathBuf,
    /// Working directory for the build process.
    pub work_dir: Option<PathBuf>,
    /// Parent environment variables forwarded to the build process.
    pub env_passthrough: Vec<String>,
}

impl CommandConfig {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            work_dir: None,
            env_passthrough: DEFAULT_ENV_PASSTHROUGH
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// What to do with a push when its repository has no free slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    Reject,
    Queue { capacity: usize },
}

#[derive(Clone, Debug)]
pub struct DispatchPolicy {
    /// Maximum builds in flight per repository.
    pub repo_limit: usize,
    /// Maximum builds in flight across all repositories.
    pub global_limit: usize,
    pub overflow: OverflowPolicy,
    pub build_timeout: Duration,
    /// Bytes kept per output stream.
    pub output_limit: usize,
    /// Terminal jobs kept in memory for inspection.
    pub history_limit: usize,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            repo_limit: 1,
            global_limit: 4,
            overflow: OverflowPolicy::Reject,
            build_timeout: Duration::from_secs(1800),
            output_limit: 65536,
            history_limit: 100,
        }
    }
}

const DEFAULT_ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "USER", "LANG", "SSH_AUTH_SOCK"];

/// Routes owned by the dispatcher itself; the webhook path may not shadow them.
const RESERVED_PATHS: &[&str] = &["/health", "/jobs"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("build script rejected: {0}")]
    Script(#[from] BuildError),
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let script_path = lookup("SHIPIRU_SCRIPT")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("SHIPIRU_SCRIPT"))?;
        if !script_path.is_absolute() {
            return Err(invalid(
                "SHIPIRU_SCRIPT",
                script_path.display(),
                "must be an absolute path",
            ));
        }
        command_builder::check_script(&script_path)?;

        let work_dir = lookup("SHIPIRU_WORK_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        if let Some(dir) = &work_dir {
            if !dir.is_dir() {
                return Err(invalid("SHIPIRU_WORK_DIR", dir.display(), "not a directory"));
            }
        }
        let env_passthrough = list_or(&lookup, "SHIPIRU_ENV_PASSTHROUGH", DEFAULT_ENV_PASSTHROUGH);

        let path = lookup("SHIPIRU_WEBHOOK_PATH").unwrap_or_else(|| "/".to_string());
        if !path.starts_with('/') {
            return Err(invalid("SHIPIRU_WEBHOOK_PATH", &path, "must start with '/'"));
        }
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        {
            return Err(invalid(
                "SHIPIRU_WEBHOOK_PATH",
                &path,
                "only letters, digits, '/', '-', '_' and '.' are allowed",
            ));
        }
        if RESERVED_PATHS
            .iter()
            .any(|reserved| path == *reserved || path.starts_with(&format!("{reserved}/")))
        {
            return Err(invalid(
                "SHIPIRU_WEBHOOK_PATH",
                &path,
                "collides with a built-in route",
            ));
        }
        let webhook_secret = lookup("SHIPIRU_WEBHOOK_SECRET").unwrap_or_default();
        let max_body_bytes = parse_or(&lookup, "SHIPIRU_MAX_BODY_BYTES", 10 * 1024 * 1024)?;
        let retry_after_secs = parse_or(&lookup, "SHIPIRU_RETRY_AFTER_SECS", 30)?;

        let allowed_sources = list_or(&lookup, "SHIPIRU_ALLOWED_SOURCES", &["git@", "ssh://"]);
        if allowed_sources.is_empty() {
            return Err(invalid(
                "SHIPIRU_ALLOWED_SOURCES",
                "",
                "at least one source prefix is required",
            ));
        }
        let allowed_hosts = list_or(&lookup, "SHIPIRU_ALLOWED_HOSTS", &[]);
        let allow_tags = bool_or(&lookup, "SHIPIRU_ALLOW_TAGS", false)?;

        let defaults = DispatchPolicy::default();
        let repo_limit: usize = parse_or(&lookup, "SHIPIRU_REPO_CONCURRENCY", defaults.repo_limit)?;
        let global_limit: usize =
            parse_or(&lookup, "SHIPIRU_GLOBAL_CONCURRENCY", defaults.global_limit)?;
        if repo_limit == 0 {
            return Err(invalid("SHIPIRU_REPO_CONCURRENCY", repo_limit, "must be at least 1"));
        }
        if global_limit < repo_limit {
            return Err(invalid(
                "SHIPIRU_GLOBAL_CONCURRENCY",
                global_limit,
                "must not be below SHIPIRU_REPO_CONCURRENCY",
            ));
        }

        let overflow = match lookup("SHIPIRU_OVERFLOW").as_deref().map(str::trim) {
            None | Some("") | Some("reject") => OverflowPolicy::Reject,
            Some("queue") => {
                let capacity: usize = parse_or(&lookup, "SHIPIRU_QUEUE_CAPACITY", 8)?;
                if capacity == 0 {
                    return Err(invalid("SHIPIRU_QUEUE_CAPACITY", capacity, "must be at least 1"));
                }
                OverflowPolicy::Queue { capacity }
            }
            Some(other) => {
                return Err(invalid("SHIPIRU_OVERFLOW", other, "expected 'reject' or 'queue'"))
            }
        };

        let timeout_secs: u64 = parse_or(
            &lookup,
            "SHIPIRU_BUILD_TIMEOUT_SECS",
            defaults.build_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(invalid("SHIPIRU_BUILD_TIMEOUT_SECS", timeout_secs, "must be at least 1"));
        }
        let output_limit = parse_or(&lookup, "SHIPIRU_OUTPUT_LIMIT_BYTES", defaults.output_limit)?;
        let history_limit = parse_or(&lookup, "SHIPIRU_JOB_HISTORY", defaults.history_limit)?;
        if history_limit == 0 {
            return Err(invalid("SHIPIRU_JOB_HISTORY", history_limit, "must be at least 1"));
        }

        if webhook_secret.is_empty() {
            tracing::warn!("SHIPIRU_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }

        Ok(Self {
            endpoint: EndpointConfig {
                path,
                webhook_secret,
                max_body_bytes,
                retry_after_secs,
            },
            validator: ValidatorConfig {
                allowed_sources,
                allowed_hosts,
                allow_tags,
            },
            command: CommandConfig {
                script_path,
                work_dir,
                env_passthrough,
            },
            policy: DispatchPolicy {
                repo_limit,
                global_limit,
                overflow,
                build_timeout: Duration::from_secs(timeout_secs),
                output_limit,
                history_limit,
            },
        })
    }
}

fn invalid(var: &'static str, value: impl Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
        _ => Ok(default),
    }
}

fn bool_or<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("no") => Ok(false),
        Some(other) => Err(invalid(var, other, "expected true or false")),
    }
}

fn list_or<F>(lookup: &F, var: &str, default: &[&str]) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}
