//! Application settings
//!
//! Read from a JSON file (every field optional) and then overridden by
//! `PF_DATABASE` / `PF_PROVIDER`. The core never reads settings itself; the
//! binary turns them into [`OptimizeParams`] per invocation.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::commands::optimize::OptimizeParams;
use crate::quotes::ProviderType;

const APP_DIR: &str = "portfolio-frontier";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub provider: ProviderType,
    /// JSON quote file for the manual provider
    pub quotes_file: Option<PathBuf>,
    /// Keep fetched history in the portfolio database
    pub cache_history: bool,
    pub risk_free_rate: f64,
    /// Length of the return window ending today
    pub history_days: i64,
    pub samples: usize,
    pub frontier_points: usize,
    pub min_target_return: f64,
    pub max_target_return: f64,
    pub seed: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            provider: ProviderType::YahooAdjusted,
            quotes_file: None,
            cache_history: true,
            risk_free_rate: 0.01,
            history_days: 365,
            samples: 500,
            frontier_points: 100,
            min_target_return: 0.0,
            max_target_return: 0.5,
            seed: None,
        }
    }
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("portfolio.db")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
}

impl AppConfig {
    /// Load settings. An explicit path must exist; the default location is
    /// used only when present. Environment overrides are applied last.
    /// Callers layer their own flags on top and then [`validate`](Self::validate).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `PF_DATABASE` and `PF_PROVIDER` from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PF_DATABASE").filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(name) = lookup("PF_PROVIDER").filter(|v| !v.trim().is_empty()) {
            self.provider = ProviderType::from_str(name.trim())
                .with_context(|| format!("unknown provider '{}' in PF_PROVIDER", name))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.risk_free_rate.is_finite() {
            bail!("riskFreeRate must be finite");
        }
        if self.history_days < 2 {
            bail!("historyDays must be at least 2, got {}", self.history_days);
        }
        if self.samples == 0 {
            bail!("samples must be positive");
        }
        if self.frontier_points < 2 {
            bail!("frontierPoints must be at least 2, got {}", self.frontier_points);
        }
        if !(self.min_target_return < self.max_target_return) {
            bail!(
                "target return range is empty: [{}, {}]",
                self.min_target_return,
                self.max_target_return
            );
        }
        if self.provider == ProviderType::Manual && self.quotes_file.is_none() {
            bail!("the manual provider needs a quotesFile");
        }
        Ok(())
    }

    pub fn optimize_params(&self) -> OptimizeParams {
        OptimizeParams {
            risk_free_rate: self.risk_free_rate,
            history_days: self.history_days,
            samples: self.samples,
            frontier_points: self.frontier_points,
            target_range: (self.min_target_return, self.max_target_return),
            seed: self.seed,
        }
    }
}
