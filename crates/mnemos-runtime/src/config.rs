//! Memory configuration – reads/writes `~/.mnemos/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use mnemos_memory::DistanceMetric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or saving [`MemoryConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Persisted perception-memory settings stored in `~/.mnemos/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the store's database.  `None` keeps everything in
    /// memory for the lifetime of the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_directory: Option<PathBuf>,

    /// Metric for newly created collections.
    #[serde(default)]
    pub distance_metric: DistanceMetric,

    /// Result count used when a query does not name one.
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Scene search radius in metres used when a query does not name one.
    #[serde(default = "default_radius")]
    pub default_radius: f64,
}

fn default_k() -> usize {
    5
}
fn default_radius() -> f64 {
    1.0
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            persist_directory: None,
            distance_metric: DistanceMetric::default(),
            default_k: default_k(),
            default_radius: default_radius(),
        }
    }
}

impl MemoryConfig {
    /// Reject values no query could use: a negative, NaN or infinite
    /// `default_radius`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_radius.is_finite() || self.default_radius < 0.0 {
            return Err(ConfigError::Invalid {
                field: "default_radius",
                reason: format!("{} is not a finite, non-negative radius", self.default_radius),
            });
        }
        Ok(())
    }
}

/// Return the path to `~/.mnemos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mnemos").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<MemoryConfig>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from disk, falling back to defaults (with environment
/// overrides applied) when the file does not exist.
pub fn load_or_default() -> Result<MemoryConfig, ConfigError> {
    Ok(load()?.unwrap_or_else(|| {
        let mut cfg = MemoryConfig::default();
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// Load the config from a specific path.
pub fn load_from(path: &Path) -> Result<Option<MemoryConfig>, ConfigError> {
    let mut cfg = read_file(path)?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Parse the file at `path` without environment overrides.
fn read_file(path: &Path) -> Result<Option<MemoryConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: MemoryConfig = toml::from_str(&raw)?;
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `MNEMOS_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `MNEMOS_PERSIST_DIR` | `persist_directory` |
/// | `MNEMOS_DISTANCE_METRIC` | `distance_metric` |
/// | `MNEMOS_DEFAULT_K` | `default_k` |
/// | `MNEMOS_DEFAULT_RADIUS` | `default_radius` |
pub fn apply_env_overrides(cfg: &mut MemoryConfig) {
    if let Ok(v) = std::env::var("MNEMOS_PERSIST_DIR")
        && !v.is_empty()
    {
        cfg.persist_directory = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("MNEMOS_DISTANCE_METRIC")
        && let Ok(metric) = v.parse::<DistanceMetric>()
    {
        cfg.distance_metric = metric;
    }
    if let Ok(v) = std::env::var("MNEMOS_DEFAULT_K")
        && let Ok(k) = v.parse::<usize>()
    {
        cfg.default_k = k;
    }
    if let Ok(v) = std::env::var("MNEMOS_DEFAULT_RADIUS")
        && let Ok(radius) = v.parse::<f64>()
        && radius.is_finite()
        && radius >= 0.0
    {
        cfg.default_radius = radius;
    }
}

/// Save the config to disk, creating `~/.mnemos/` if necessary.
pub fn save(cfg: &MemoryConfig) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub fn save_to(cfg: &MemoryConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = MemoryConfig::default();
        assert_eq!(cfg.persist_directory, None);
        assert_eq!(cfg.distance_metric, DistanceMetric::Cosine);
        assert_eq!(cfg.default_k, 5);
        assert_eq!(cfg.default_radius, 1.0);
    }

    #[test]
    fn config_path_points_to_mnemos_dir() {
        let p = config_path_for_home("/home/robot");
        assert!(p.to_string_lossy().contains(".mnemos"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "distance_metric = \"l2\"\n").unwrap();

        let cfg = read_file(&path).expect("load ok").expect("some");
        assert_eq!(cfg.distance_metric, DistanceMetric::L2);
        assert_eq!(cfg.default_k, 5);
    }

    #[test]
    fn unknown_metric_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "distance_metric = \"manhattan\"\n").unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn out_of_range_radius_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");

        for radius in ["-1.0", "nan", "inf"] {
            std::fs::write(&path, format!("default_radius = {radius}\n")).unwrap();
            match read_file(&path) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "default_radius"),
                other => panic!("radius {radius} accepted: {other:?}"),
            }
        }

        std::fs::write(&path, "default_radius = 0.0\ndefault_k = 0\n").unwrap();
        let cfg = read_file(&path).expect("load ok").expect("some");
        assert_eq!(cfg.default_radius, 0.0);
        assert_eq!(cfg.default_k, 0);
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = MemoryConfig {
            persist_directory: Some(dir.path().join("db")),
            distance_metric: DistanceMetric::Ip,
            default_k: 3,
            default_radius: 2.5,
        };
        save_to(&cfg, &path).expect("save");

        let loaded = read_file(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&MemoryConfig::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    // Every env-var case lives in this one test; the file tests above read
    // without overrides.
    #[test]
    fn apply_env_overrides_reads_mnemos_vars() {
        // SAFETY: no other test touches MNEMOS_* variables.
        unsafe {
            std::env::set_var("MNEMOS_PERSIST_DIR", "/var/lib/mnemos");
            std::env::set_var("MNEMOS_DISTANCE_METRIC", "L2");
            std::env::set_var("MNEMOS_DEFAULT_K", "12");
            std::env::set_var("MNEMOS_DEFAULT_RADIUS", "0.5");
        }
        let mut cfg = MemoryConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.persist_directory, Some(PathBuf::from("/var/lib/mnemos")));
        assert_eq!(cfg.distance_metric, DistanceMetric::L2);
        assert_eq!(cfg.default_k, 12);
        assert_eq!(cfg.default_radius, 0.5);

        unsafe {
            std::env::set_var("MNEMOS_DISTANCE_METRIC", "manhattan");
            std::env::set_var("MNEMOS_DEFAULT_K", "many");
            std::env::set_var("MNEMOS_DEFAULT_RADIUS", "-3");
        }
        let mut cfg = MemoryConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.distance_metric, DistanceMetric::Cosine);
        assert_eq!(cfg.default_k, 5);
        assert_eq!(cfg.default_radius, 1.0);

        unsafe {
            std::env::remove_var("MNEMOS_PERSIST_DIR");
            std::env::remove_var("MNEMOS_DISTANCE_METRIC");
            std::env::remove_var("MNEMOS_DEFAULT_K");
            std::env::remove_var("MNEMOS_DEFAULT_RADIUS");
        }
    }
}
