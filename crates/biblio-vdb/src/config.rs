//! Configuration loaded from environment variables.
//!
//! All settings have defaults suitable for a full, unsampled run.
//!
//! | Variable                 | Default | Description                                      |
//! |--------------------------|---------|--------------------------------------------------|
//! | `BIBLIO_LOG_LEVEL`       | `info`  | tracing filter (e.g. `biblio_vdb::sql=debug,info`) |
//! | `BIBLIO_ATTACH`          | empty   | comma-separated `name:path` databases to attach  |
//! | `BIBLIO_SAMPLE_FRACTION` | `1.0`   | fraction of containers processed                 |
//! | `BIBLIO_SAMPLE_SEED`     | `0`     | seed of the sampling predicate                   |
//! | `BIBLIO_FAST_WRITES`     | `true`  | destination `synchronous` and `journal_mode` OFF |

use std::path::PathBuf;

use biblio_containers::{sample, SamplePredicate};
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Result, VdbError};
use crate::sql::{POPULATED_DB, VIRTUAL_DB};

/// Runtime configuration of a data source.
#[derive(Debug, Clone)]
pub struct VdbConfig {
    /// Tracing filter string.
    pub log_level: String,

    /// Raw `BIBLIO_ATTACH` value; see [`VdbConfig::attach_specs`].
    pub attach: String,

    /// Fraction of containers to process, in `0.0..=1.0`.
    pub sample_fraction: f64,

    pub sample_seed: u64,

    /// Trade durability of the destination for write speed.
    pub fast_writes: bool,
}

impl VdbConfig {
    /// Load configuration from environment variables, applying defaults where
    /// a variable is absent or unparseable.
    pub fn from_env() -> Self {
        Self {
            log_level:       env_str("BIBLIO_LOG_LEVEL", "info"),
            attach:          env_str("BIBLIO_ATTACH", ""),
            sample_fraction: env_parse("BIBLIO_SAMPLE_FRACTION", 1.0),
            sample_seed:     env_parse("BIBLIO_SAMPLE_SEED", 0),
            fast_writes:     env_bool("BIBLIO_FAST_WRITES", true),
        }
    }

    pub fn attach_specs(&self) -> Result<Vec<AttachSpec>> {
        self.attach
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(AttachSpec::parse)
            .collect()
    }

    /// Sampling predicate for container enumeration; `None` processes all.
    pub fn sample_predicate(&self) -> Option<SamplePredicate> {
        if self.sample_fraction >= 1.0 {
            None
        } else {
            Some(sample::random_fraction(self.sample_fraction, self.sample_seed))
        }
    }
}

impl Default for VdbConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            attach: String::new(),
            sample_fraction: 1.0,
            sample_seed: 0,
            fast_writes: true,
        }
    }
}

/// Installs a compact `fmt` subscriber filtered by `config.log_level`.
/// Returns `false` when a global subscriber was already set.
pub fn init_tracing(config: &VdbConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).compact().try_init().is_ok()
}

// ─────────────────────────────────────────────
// Attached databases
// ─────────────────────────────────────────────

/// A database attached to every connection of a data source, so queries and
/// population conditions can refer to `name.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSpec {
    pub name: String,
    pub path: PathBuf,
}

impl AttachSpec {
    /// Parses `name:path`. Names used internally are rejected.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = || VdbError::AttachSpec(spec.to_string());
        let (name, path) = spec.split_once(':').ok_or_else(invalid)?;
        let plain = name.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let reserved = ["main", "temp", POPULATED_DB, VIRTUAL_DB]
            .iter()
            .any(|r| r.eq_ignore_ascii_case(name));
        if !plain || reserved || path.is_empty() {
            return Err(invalid());
        }
        Ok(Self { name: name.to_string(), path: PathBuf::from(path) })
    }
}

// ─────────────────────────────────────────────
// Source options
// ─────────────────────────────────────────────

/// Per-source settings.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub attach: Vec<AttachSpec>,
    pub fast_writes: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self { attach: Vec::new(), fast_writes: true }
    }
}

impl SourceOptions {
    pub fn from_config(config: &VdbConfig) -> Result<Self> {
        Ok(Self { attach: config.attach_specs()?, fast_writes: config.fast_writes })
    }

    pub fn attach(mut self, spec: AttachSpec) -> Self {
        self.attach.push(spec);
        self
    }

    pub fn fast_writes(mut self, enabled: bool) -> Self {
        self.fast_writes = enabled;
        self
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
