//! Configuration Vault – reads/writes `~/.triton/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use triton_estimation::{PoolConfig, ProjectionConfig};
use triton_middleware::ConnectionTable;
use triton_runtime::ModelingSettings;
use triton_types::{DEFAULT_PRIOR_MEAN, DEFAULT_PRIOR_VARIANCE, STATE_LEN};

/// Seed mean and variance for the hypothesis pool, in state-index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    #[serde(default = "default_prior_mean")]
    pub mean: Vec<f32>,
    #[serde(default = "default_prior_variance")]
    pub variance: Vec<f32>,
}

impl Default for Prior {
    fn default() -> Self {
        Self {
            mean: default_prior_mean(),
            variance: default_prior_variance(),
        }
    }
}

fn default_prior_mean() -> Vec<f32> {
    DEFAULT_PRIOR_MEAN.to_vec()
}
fn default_prior_variance() -> Vec<f32> {
    DEFAULT_PRIOR_VARIANCE.to_vec()
}

/// Persisted configuration stored in `~/.triton/config.toml`.
///
/// Plain values come first so the TOML output keeps them above the tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Warn when the modeling input is silent for this long.  Unset means
    /// wait forever without warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,

    /// Modeling persists its pool here on exit and resumes from it on start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default)]
    pub prior: Prior,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Role → pipe bindings.
    #[serde(default)]
    pub connections: ConnectionTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            snapshot_path: None,
            prior: Prior::default(),
            pool: PoolConfig::default(),
            projection: ProjectionConfig::default(),
            connections: ConnectionTable::default(),
        }
    }
}

impl Config {
    /// Check everything serde cannot: table consistency, vector lengths and
    /// parameter ranges.
    pub fn validate(&self) -> Result<(), String> {
        self.connections
            .validate()
            .map_err(|e| format!("Invalid connection table: {e}"))?;
        if self.prior.mean.len() != STATE_LEN || self.prior.variance.len() != STATE_LEN {
            return Err(format!(
                "Prior must hold {STATE_LEN} means and {STATE_LEN} variances (got {} and {})",
                self.prior.mean.len(),
                self.prior.variance.len()
            ));
        }
        if !(0.0..1.0).contains(&self.pool.prune_floor) {
            return Err(format!(
                "pool.prune_floor must be in [0, 1), got {}",
                self.pool.prune_floor
            ));
        }
        if self.pool.merge_distance.is_nan() || self.pool.merge_distance < 0.0 {
            return Err(format!(
                "pool.merge_distance must be non-negative, got {}",
                self.pool.merge_distance
            ));
        }
        if self.pool.max_hypotheses == 0 {
            return Err("pool.max_hypotheses must be at least 1".to_string());
        }
        if self.read_timeout_ms == Some(0) {
            return Err("read_timeout_ms must be positive when set".to_string());
        }
        Ok(())
    }

    /// The modeling role's view of this configuration.
    pub fn modeling_settings(&self) -> ModelingSettings {
        ModelingSettings {
            prior_mean: self.prior.mean.clone(),
            prior_variance: self.prior.variance.clone(),
            pool: self.pool,
            projection: self.projection,
            read_timeout: self.read_timeout_ms.map(Duration::from_millis),
            snapshot_path: self.snapshot_path.clone(),
        }
    }
}

/// Return the path to `~/.triton/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".triton").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Load `path`, or the defaults (with environment overrides) when it is
/// absent.
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

/// Apply `TRITON_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `TRITON_PRUNE_FLOOR` | `pool.prune_floor` |
/// | `TRITON_MERGE_DISTANCE` | `pool.merge_distance` |
/// | `TRITON_MAX_HYPOTHESES` | `pool.max_hypotheses` |
/// | `TRITON_READ_TIMEOUT_MS` | `read_timeout_ms` |
/// | `TRITON_SNAPSHOT_PATH` | `snapshot_path` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// [`apply_env_overrides`] against an arbitrary variable lookup.
pub(crate) fn apply_overrides_from<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TRITON_PRUNE_FLOOR")
        && let Ok(floor) = v.parse::<f32>()
    {
        cfg.pool.prune_floor = floor;
    }
    if let Some(v) = lookup("TRITON_MERGE_DISTANCE")
        && let Ok(distance) = v.parse::<f32>()
    {
        cfg.pool.merge_distance = distance;
    }
    if let Some(v) = lookup("TRITON_MAX_HYPOTHESES")
        && let Ok(max) = v.parse::<usize>()
    {
        cfg.pool.max_hypotheses = max;
    }
    if let Some(v) = lookup("TRITON_READ_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.read_timeout_ms = Some(ms);
    }
    if let Some(v) = lookup("TRITON_SNAPSHOT_PATH")
        && !v.is_empty()
    {
        cfg.snapshot_path = Some(PathBuf::from(v));
    }
}

/// Save the config to a specific path, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
