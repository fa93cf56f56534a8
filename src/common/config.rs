use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{VerifyError, Result};
use crate::common::paths;

/// Euclidean distance below which two face descriptors are the same person.
pub const FACE_DISTANCE_THRESHOLD: f32 = 0.6;

/// Percentage of challenge words that must appear in the transcript.
pub const PHRASE_MATCH_THRESHOLD: f32 = 60.0;

/// Descriptor length produced by the 68-landmark recognition net.
pub const DEFAULT_DESCRIPTOR_LENGTH: usize = 128;

pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 500;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub phrase: PhraseConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceConfig {
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
    /// Expected descriptor length; 0 accepts any length.
    #[serde(default = "default_descriptor_length")]
    pub descriptor_length: usize,
}

fn default_distance_threshold() -> f32 { FACE_DISTANCE_THRESHOLD }
fn default_descriptor_length() -> usize { DEFAULT_DESCRIPTOR_LENGTH }

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            descriptor_length: default_descriptor_length(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PhraseConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
}

fn default_match_threshold() -> f32 { PHRASE_MATCH_THRESHOLD }

impl Default for PhraseConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
}

fn default_interval() -> u64 { DEFAULT_DETECTION_INTERVAL_MS }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { interval_ms: default_interval() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttendanceConfig {
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// Public URL prefix the check-in links are built on.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_recent_limit() -> usize { 100 }
fn default_base_url() -> String { "http://localhost:5000".to_string() }

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            base_url: default_base_url(),
        }
    }
}

impl Config {
    /// Resolve the config file: explicit path, then the repo-local file, then
    /// the per-user config directory. Falls back to defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        let candidates: Vec<PathBuf> = [
            Some(PathBuf::from("configs/checkin-verify.toml")),
            paths::user_config_file(),
        ]
        .into_iter()
        .flatten()
        .collect();

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_path(&candidate);
            }
        }

        tracing::debug!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VerifyError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| VerifyError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.face.distance_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 2.0 {
            return Err(VerifyError::Config(format!(
                "Face distance threshold must be in (0.0, 2.0], got {}", threshold
            )));
        }

        if self.face.descriptor_length > 4096 {
            return Err(VerifyError::Config(format!(
                "Descriptor length must be at most 4096, got {}", self.face.descriptor_length
            )));
        }

        let pct = self.phrase.match_threshold;
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return Err(VerifyError::Config(format!(
                "Phrase match threshold must be in (0, 100], got {}", pct
            )));
        }

        if self.detection.interval_ms < 50 || self.detection.interval_ms > 60_000 {
            return Err(VerifyError::Config(format!(
                "Detection interval must be between 50 and 60000 ms, got {}",
                self.detection.interval_ms
            )));
        }

        if self.attendance.recent_limit == 0 {
            return Err(VerifyError::Config(
                "Attendance recent_limit must be at least 1".to_string()
            ));
        }

        let base = &self.attendance.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(VerifyError::Config(format!(
                "Attendance base_url must start with http:// or https://, got {:?}", base
            )));
        }

        Ok(())
    }

    /// Descriptor length the matcher enforces, if any.
    pub fn expected_descriptor_length(&self) -> Option<usize> {
        match self.face.descriptor_length {
            0 => None,
            n => Some(n),
        }
    }
}
