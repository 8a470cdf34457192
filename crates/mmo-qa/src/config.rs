//! Configuration for downmix QA runs

use crate::decode::DecoderKind;
use crate::error::{QaError, QaResult};
use crate::meters::MeterPack;
use mmo_downmix::STEREO_LAYOUT_ID;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default rebuffering block, in frames
pub const DEFAULT_CHUNK_FRAMES: usize = 4096;

/// Default comparison window, in seconds (0 = whole overlap)
pub const DEFAULT_MAX_SECONDS: f64 = 120.0;

/// Allowed |fold - reference| per metric
///
/// Fields are declared alphabetically so the serialised run log stays sorted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub correlation: f64,
    /// Integrated loudness, LU
    pub lufs: f64,
    pub true_peak_db: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            correlation: 0.15,
            lufs: 1.0,
            true_peak_db: 1.0,
        }
    }
}

/// Downmix QA settings, loadable from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub tolerances: Tolerances,

    /// Meter pack used on both streams
    pub meters: MeterPack,

    /// Cap on the compared duration; 0 or less compares the whole overlap
    pub max_seconds: f64,

    /// Frames per aligned block
    pub chunk_frames: usize,

    pub source_layout_id: Option<String>,

    pub target_layout_id: String,

    /// Explicit policy; otherwise the source layout's default
    pub policy_id: Option<String>,

    pub decoder: DecoderKind,

    /// On-disk ontology replacing the built-in one
    pub ontology_dir: Option<PathBuf>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            meters: MeterPack::Truth,
            max_seconds: DEFAULT_MAX_SECONDS,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            source_layout_id: None,
            target_layout_id: STEREO_LAYOUT_ID.to_string(),
            policy_id: None,
            decoder: DecoderKind::Native,
            ontology_dir: None,
        }
    }
}

impl QaConfig {
    /// Tight tolerances for mastering sign-off
    pub fn strict() -> Self {
        Self {
            tolerances: Tolerances {
                lufs: 0.5,
                true_peak_db: 0.5,
                correlation: 0.1,
            },
            ..Default::default()
        }
    }

    /// Loose tolerances for rough checks
    pub fn lenient() -> Self {
        Self {
            tolerances: Tolerances {
                lufs: 2.0,
                true_peak_db: 2.0,
                correlation: 0.3,
            },
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> QaResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::default()),
            "strict" => Ok(Self::strict()),
            "lenient" => Ok(Self::lenient()),
            other => Err(QaError::InvalidConfig(format!("unknown preset '{other}'"))),
        }
    }

    /// Builder pattern: set all three tolerances
    pub fn with_tolerances(mut self, lufs: f64, true_peak_db: f64, correlation: f64) -> Self {
        self.tolerances = Tolerances {
            correlation,
            lufs,
            true_peak_db,
        };
        self
    }

    pub fn with_lufs_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerances.lufs = tolerance;
        self
    }

    pub fn with_true_peak_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerances.true_peak_db = tolerance;
        self
    }

    pub fn with_correlation_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerances.correlation = tolerance;
        self
    }

    pub fn with_meters(mut self, meters: MeterPack) -> Self {
        self.meters = meters;
        self
    }

    pub fn with_max_seconds(mut self, seconds: f64) -> Self {
        self.max_seconds = seconds;
        self
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames;
        self
    }

    pub fn with_source_layout(mut self, layout_id: impl Into<String>) -> Self {
        self.source_layout_id = Some(layout_id.into());
        self
    }

    pub fn with_target_layout(mut self, layout_id: impl Into<String>) -> Self {
        self.target_layout_id = layout_id.into();
        self
    }

    pub fn with_policy(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderKind) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_ontology_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ontology_dir = Some(dir.into());
        self
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> QaResult<Self> {
        let config: Self = serde_yml::from_str(text).map_err(|error| QaError::Yaml {
            path: origin.to_string(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> QaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|error| QaError::Io {
            path: path.display().to_string(),
            error,
        })?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn to_yaml(&self) -> QaResult<String> {
        serde_yml::to_string(self).map_err(|error| QaError::Yaml {
            path: "<config>".to_string(),
            error,
        })
    }

    pub fn validate(&self) -> QaResult<()> {
        if self.chunk_frames == 0 {
            return Err(QaError::InvalidConfig("chunk_frames must be positive".into()));
        }
        let t = &self.tolerances;
        for (name, value) in [
            ("lufs", t.lufs),
            ("true_peak_db", t.true_peak_db),
            ("correlation", t.correlation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(QaError::InvalidConfig(format!(
                    "tolerance {name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.max_seconds.is_nan() {
            return Err(QaError::InvalidConfig("max_seconds must be a number".into()));
        }
        if self.target_layout_id.is_empty() {
            return Err(QaError::InvalidConfig("target_layout_id must not be empty".into()));
        }
        Ok(())
    }
}
