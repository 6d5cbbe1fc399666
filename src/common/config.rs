//! Runtime configuration loaded from defaults, an optional TOML file and the environment.
//!
//! Layers apply in that order, so an environment variable always wins over the file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::error::{MlaasError, MlaasResult};

/// Snapshot of configuration values consumed by the core.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    pub data_root: PathBuf,
    /// Artifact directory; `<data_root>/models` when unset.
    pub models_dir: Option<PathBuf>,
    pub log_level: String,
    pub workers: usize,
    /// Largest dataset id accepted at ingestion.
    pub max_dsid: u32,
    /// Cap on samples returned by a dataset listing.
    pub list_limit: usize,
    pub feature_width: u32,
    pub feature_height: u32,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            models_dir: None,
            log_level: "info".to_string(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_dsid: 50,
            list_limit: 1000,
            feature_width: 128,
            feature_height: 128,
        }
    }
}

impl AppCfg {
    /// Defaults, then the file named by `MLAAS_CONFIG` (if any), then environment overrides.
    pub fn load() -> MlaasResult<Self> {
        let mut cfg = match env::var_os("MLAAS_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> MlaasResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MlaasError::invalid(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> MlaasResult<Self> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| MlaasError::invalid(format!("failed to parse TOML config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `MLAAS_*` overrides from `lookup`; split out so tests need not touch the process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> MlaasResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MLAAS_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("MLAAS_MODELS_DIR") {
            self.models_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MLAAS_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("MLAAS_WORKERS") {
            self.workers = parse_key("MLAAS_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MLAAS_MAX_DSID") {
            self.max_dsid = parse_key("MLAAS_MAX_DSID", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> MlaasResult<()> {
        if self.workers == 0 {
            return Err(MlaasError::invalid("workers must be at least 1"));
        }
        if self.max_dsid == 0 {
            return Err(MlaasError::invalid("max_dsid must be at least 1"));
        }
        if self.feature_width == 0 || self.feature_height == 0 {
            return Err(MlaasError::invalid(
                "feature_width and feature_height must be non-zero",
            ));
        }
        Ok(())
    }

    pub fn models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("models"))
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_root.join("datasets")
    }
}

fn parse_key<T: std::str::FromStr>(key: &str, value: &str) -> MlaasResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MlaasError::invalid(format!("{key} has an invalid value: {value:?}")))
}
