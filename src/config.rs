use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::llm::LlmConfig;

/// Everything the pipeline is allowed to tune, loaded once at startup and
/// passed to each stage by reference. Thresholds and budgets live here
/// rather than at their call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Candidate profile document (YAML), serialized into fit judgments.
    #[serde(default = "default_profile_path")]
    pub profile_path: PathBuf,
    /// Master resume/cover-letter source material (markdown).
    #[serde(default = "default_master_source_path")]
    pub master_source_path: PathBuf,
    /// Root directory for generated artifacts (resumes/, cover_letters/).
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Minimum fit score for a listing to get an application drafted.
    #[serde(default = "default_min_fit_score")]
    pub min_fit_score: f64,
    /// Aggregate review score at which the refinement loop accepts.
    #[serde(default = "default_min_approval_score")]
    pub min_approval_score: f64,
    /// Reviewer personas for the critique step.
    #[serde(default = "default_personas")]
    pub personas: Vec<String>,
    /// Revision attempts per review pass. The loop always terminates once
    /// this budget is spent, approved or not.
    #[serde(default = "default_max_refine_rounds")]
    pub max_refine_rounds: u32,

    /// Trailing window for scoring freshly discovered listings.
    #[serde(default = "default_discovery_window_days")]
    pub discovery_window_days: i64,
    /// Per-cycle cap on listings pulled into the fit gate.
    #[serde(default = "default_discovery_batch_limit")]
    pub discovery_batch_limit: usize,
    /// Search seeds: role keywords and locations, combined pairwise.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,

    /// Timeout for page fetches and web searches.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_profile_path() -> PathBuf {
    PathBuf::from("profile.yaml")
}
fn default_master_source_path() -> PathBuf {
    PathBuf::from("master_source.md")
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}
fn default_min_fit_score() -> f64 {
    60.0
}
fn default_min_approval_score() -> f64 {
    90.0
}
fn default_personas() -> Vec<String> {
    vec![
        "ATS Specialist".to_string(),
        "Recruiter".to_string(),
        "Hiring Manager".to_string(),
    ]
}
fn default_max_refine_rounds() -> u32 {
    2
}
fn default_discovery_window_days() -> i64 {
    15
}
fn default_discovery_batch_limit() -> usize {
    20
}
fn default_http_timeout_secs() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile_path: default_profile_path(),
            master_source_path: default_master_source_path(),
            storage_dir: default_storage_dir(),
            db_path: None,
            min_fit_score: default_min_fit_score(),
            min_approval_score: default_min_approval_score(),
            personas: default_personas(),
            max_refine_rounds: default_max_refine_rounds(),
            discovery_window_days: default_discovery_window_days(),
            discovery_batch_limit: default_discovery_batch_limit(),
            keywords: Vec::new(),
            locations: Vec::new(),
            http_timeout_secs: default_http_timeout_secs(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate. A missing file falls back to defaults so that
    /// `legwork init` works on a blank machine.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            warn!("config file {} not found, using defaults", path.display());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_fit_score) {
            bail!("min_fit_score must be in 0..=100, got {}", self.min_fit_score);
        }
        if !(0.0..=100.0).contains(&self.min_approval_score) {
            bail!(
                "min_approval_score must be in 0..=100, got {}",
                self.min_approval_score
            );
        }
        if self.personas.is_empty() {
            bail!("personas must not be empty");
        }
        if self.max_refine_rounds > 3 {
            bail!(
                "max_refine_rounds must be at most 3, got {}",
                self.max_refine_rounds
            );
        }
        if self.discovery_window_days < 1 {
            bail!(
                "discovery_window_days must be at least 1, got {}",
                self.discovery_window_days
            );
        }
        if self.discovery_batch_limit < 1 {
            bail!(
                "discovery_batch_limit must be at least 1, got {}",
                self.discovery_batch_limit
            );
        }
        if self.http_timeout_secs == 0 || self.llm.timeout_secs == 0 {
            bail!("timeouts must be non-zero");
        }
        Ok(())
    }

    /// Candidate profile as YAML text, validated to parse.
    pub fn load_profile(&self) -> Result<String> {
        let text = fs::read_to_string(&self.profile_path).with_context(|| {
            format!("Failed to read profile {}", self.profile_path.display())
        })?;
        serde_yaml::from_str::<serde_yaml::Value>(&text).with_context(|| {
            format!("Profile {} is not valid YAML", self.profile_path.display())
        })?;
        Ok(text)
    }

    /// Master source document for drafting.
    pub fn load_master_source(&self) -> Result<String> {
        let text = fs::read_to_string(&self.master_source_path).with_context(|| {
            format!(
                "Failed to read master source {}",
                self.master_source_path.display()
            )
        })?;
        if text.trim().is_empty() {
            bail!(
                "Master source {} is empty",
                self.master_source_path.display()
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.min_fit_score, 60.0);
        assert_eq!(config.min_approval_score, 90.0);
        assert_eq!(config.max_refine_rounds, 2);
        assert_eq!(config.discovery_window_days, 15);
        assert_eq!(config.discovery_batch_limit, 20);
        assert_eq!(config.personas.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("min_fit_score: 75\nkeywords: [rust]").unwrap();
        assert_eq!(config.min_fit_score, 75.0);
        assert_eq!(config.min_approval_score, 90.0);
        assert_eq!(config.keywords, vec!["rust".to_string()]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.min_fit_score = 120.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.personas.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_refine_rounds = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery_window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/legwork.yaml")).unwrap();
        assert_eq!(config.min_fit_score, 60.0);
    }

    #[test]
    fn test_load_profile_rejects_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yaml");
        std::fs::write(&path, "narratives:\n  - name: Builder\n    pitch: ships things\n").unwrap();

        let mut config = Config::default();
        config.profile_path = path.clone();
        assert!(config.load_profile().unwrap().contains("Builder"));

        std::fs::write(&path, "a: [unclosed").unwrap();
        assert!(config.load_profile().is_err());
    }
}
