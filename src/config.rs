//! Configuration for the link transport subsystem.
//!
//! Grounded on `arti-relay/src/config.rs`'s shape (a top-level config struct
//! built from `serde`-derived sections, discovered through `directories`-based
//! default paths) but trimmed to the knobs spec.md §6 recognizes: event-loop
//! sizing, throughput bucket width, default token-bucket rate/burst, and
//! preferred auth-method ordering. This crate is a subsystem, not a whole
//! relay, so unlike the teacher it does not depend on `tor_config`,
//! `fs_mistrust`, or any of the higher-level `tor_*mgr` crates: there is no
//! directory client, no circuit manager, and no keystore here.

mod listen;

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::metadata::Level;
use tracing_subscriber::filter::EnvFilter;

use self::listen::Listen;

/// Paths used for default configuration file discovery: a single file
/// followed by a conf.d-style directory, both under the platform config dir.
pub fn default_config_paths() -> Result<Vec<PathBuf>, ConfigPathError> {
    let dir = config_dir()?;
    Ok(vec![dir.join("relaylink.toml"), dir.join("relaylink.d")])
}

/// The platform-appropriate configuration directory for this crate, found
/// through the [`directories`] crate the way `arti-relay`'s `base_resolver()`
/// does, but without the `tor_config_path` variable-substitution machinery
/// this crate has no use for.
fn config_dir() -> Result<PathBuf, ConfigPathError> {
    project_dirs().map(|p| p.config_dir().to_owned())
}

fn project_dirs() -> Result<&'static ProjectDirs, ConfigPathError> {
    static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
        LazyLock::new(|| ProjectDirs::from("org", "torproject", "tor-relaylink"));

    PROJECT_DIRS.as_ref().ok_or(ConfigPathError::NoProjectDirs)
}

/// Failure to resolve a default configuration path.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum ConfigPathError {
    #[error("could not determine the platform configuration directory")]
    NoProjectDirs,
}

/// Top-level configuration for the link transport subsystem.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RelayLinkConfig {
    /// Addresses this relay listens on for incoming OR connections.
    pub relay: RelayConfig,

    /// Event-loop sizing and the throughput ring's bucket width.
    pub eventloop: EventLoopConfig,

    /// Default per-connection token-bucket rate and burst.
    pub rate_limit: RateLimitConfig,

    /// Preferred AUTH_CHALLENGE method ordering.
    pub auth: AuthConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl RelayLinkConfig {
    /// Loads configuration by merging every existing file in `paths`, in
    /// order, over the built-in defaults. A path that is a directory has its
    /// immediate `*.toml` children merged in sorted order; a path that does
    /// not exist is silently skipped, matching `arti-relay`'s config
    /// discovery (a missing default file is not an error).
    pub fn load(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::value::Table::new());
        for path in paths {
            if path.is_dir() {
                let mut entries: Vec<_> = std::fs::read_dir(path)
                    .map_err(|e| ConfigError::Io(path.clone(), e.to_string()))?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                    .collect();
                entries.sort();
                for entry in entries {
                    merge_file(&mut merged, &entry)?;
                }
            } else if path.is_file() {
                merge_file(&mut merged, path)?;
            }
        }
        merged
            .try_into()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `KEY=VALUE` overrides (dotted key path, TOML-literal value),
    /// the semantics of the CLI's `-o`/`--option` flag.
    pub fn apply_overrides(self, overrides: &[String]) -> Result<Self, ConfigError> {
        let mut value = toml::Value::try_from(&self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for raw in overrides {
            let (key, val) = raw
                .split_once('=')
                .ok_or_else(|| ConfigError::BadOverride(raw.clone()))?;
            let parsed = toml::from_str::<toml::Value>(val)
                .unwrap_or_else(|_| toml::Value::String(val.to_owned()));
            set_path(&mut value, key, parsed);
        }
        value
            .try_into()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn merge_file(into: &mut toml::Value, path: &PathBuf) -> Result<(), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.clone(), e.to_string()))?;
    let parsed: toml::Value = toml::from_str(&text).map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
    merge_values(into, parsed);
    Ok(())
}

/// Deep-merges `from` into `into`, with `from`'s leaves taking precedence.
fn merge_values(into: &mut toml::Value, from: toml::Value) {
    match (into, from) {
        (toml::Value::Table(into), toml::Value::Table(from)) => {
            for (k, v) in from {
                match into.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        into.insert(k, v);
                    }
                }
            }
        }
        (into, from) => *into = from,
    }
}

/// Sets `value` at the dotted `path`, creating intermediate tables as needed.
fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut cursor = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !cursor.is_table() {
            *cursor = toml::Value::Table(toml::value::Table::new());
        }
        let table = cursor.as_table_mut().expect("just ensured table");
        if parts.peek().is_none() {
            table.insert(part.to_owned(), value);
            return;
        }
        cursor = table
            .entry(part.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
    }
}

/// Failure loading or applying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {0}: {1}")]
    Io(PathBuf, String),
    #[error("could not parse configuration: {0}")]
    Parse(String),
    #[error("malformed -o/--option override {0:?}, expected KEY=VALUE")]
    BadOverride(String),
}

/// Addresses this relay listens on for incoming OR connections.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen: Listen,
}

/// Worker event-loop sizing and throughput accounting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Number of worker event-loop threads (spec.md §6 `num_eventloops`).
    pub num_eventloops: usize,

    /// Width, in milliseconds, of one throughput-ring bucket (spec.md §6
    /// `timestep_ms`, default 500).
    pub timestep_ms: u64,
}

impl EventLoopConfig {
    pub fn timestep(&self) -> Duration {
        Duration::from_millis(self.timestep_ms)
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            num_eventloops: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            timestep_ms: 500,
        }
    }
}

/// Default per-connection token-bucket rate and burst, in bytes/second and
/// bytes respectively. Individual connections may be given different values
/// through `adjust_buckets` (spec.md §4.7); these are only the defaults new
/// connections start with.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_read_rate: u64,
    pub default_read_burst: u64,
    pub default_write_rate: u64,
    pub default_write_burst: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        /// 10 MiB/s, matching the relay-default bandwidthrate tor has long
        /// shipped as a non-starvation floor.
        const DEFAULT_RATE: u64 = 10 * 1024 * 1024;
        /// One second of headroom at the default rate.
        const DEFAULT_BURST: u64 = DEFAULT_RATE * 2;
        Self {
            default_read_rate: DEFAULT_RATE,
            default_read_burst: DEFAULT_BURST,
            default_write_rate: DEFAULT_RATE,
            default_write_burst: DEFAULT_BURST,
        }
    }
}

/// The three AUTH_CHALLENGE methods spec.md §4.6 recognizes, numbered per
/// the link-handshake wire protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u16)]
pub enum AuthMethod {
    RsaSha256TlsSecret = 1,
    RsaSha256Rfc5705 = 2,
    Ed25519Sha256Rfc5705 = 3,
}

impl AuthMethod {
    pub fn wire_code(self) -> u16 {
        self as u16
    }
}

/// Preferred AUTH_CHALLENGE method ordering (spec.md §4.6: "choose the best
/// supported method").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub preferred_methods: Vec<AuthMethod>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            preferred_methods: vec![
                AuthMethod::Ed25519Sha256Rfc5705,
                AuthMethod::RsaSha256Rfc5705,
                AuthMethod::RsaSha256TlsSecret,
            ],
        }
    }
}

/// Default log level, used when neither configuration nor the CLI overrides
/// it.
pub const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Logging configuration options.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct LoggingConfig {
    /// Filtering directives that determine tracing levels, in the syntax
    /// accepted by [`tracing_subscriber::EnvFilter`].
    ///
    /// You can override this setting with the `-l`/`--log-level` command
    /// line parameter.
    ///
    /// Example: `"info,tor_relaylink::channel=trace"`.
    pub console: String,
}

impl LoggingConfig {
    /// Validates that `console` parses as an [`EnvFilter`] directive string.
    pub fn validate(&self) -> Result<(), ConfigError> {
        EnvFilter::builder()
            .parse(&self.console)
            .map_err(|e| ConfigError::Parse(format!("logging.console: {e}")))?;
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RelayLinkConfig::default();
        cfg.logging.validate().unwrap();
        assert!(cfg.eventloop.num_eventloops >= 1);
        assert_eq!(cfg.eventloop.timestep_ms, 500);
        assert_eq!(
            cfg.auth.preferred_methods[0],
            AuthMethod::Ed25519Sha256Rfc5705
        );
    }

    #[test]
    fn merge_overrides_nested_value() {
        let mut base = toml::Value::try_from(&RelayLinkConfig::default()).unwrap();
        let layer: toml::Value = toml::from_str("[eventloop]\ntimestep_ms = 100\n").unwrap();
        merge_values(&mut base, layer);
        let cfg: RelayLinkConfig = base.try_into().unwrap();
        assert_eq!(cfg.eventloop.timestep_ms, 100);
        assert_eq!(cfg.eventloop.num_eventloops, RelayLinkConfig::default().eventloop.num_eventloops);
    }

    #[test]
    fn apply_overrides_sets_dotted_path() {
        let cfg = RelayLinkConfig::default();
        let cfg = cfg
            .apply_overrides(&["eventloop.num_eventloops=4".to_owned()])
            .unwrap();
        assert_eq!(cfg.eventloop.num_eventloops, 4);
    }

    #[test]
    fn apply_overrides_rejects_malformed_entry() {
        let cfg = RelayLinkConfig::default();
        let err = cfg.apply_overrides(&["no-equals-sign".to_owned()]).unwrap_err();
        assert!(matches!(err, ConfigError::BadOverride(_)));
    }
}
