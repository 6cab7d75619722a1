//! Configuration types for the registration pipeline.
//!
//! Every component takes a typed config with documented bounds. `validate()`
//! is called by the component constructors; the [`Parameters`] trait adds
//! keyword persistence and get/set by name for tooling.

use std::path::PathBuf;

use glam::DVec2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::keywords::{decode_value, KeywordError, Keywordlist};
use crate::model::ModelKind;
use crate::raster::PixelRect;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("Unknown parameter {0:?}")]
    UnknownParameter(String),
    #[error("Keyword conversion failed")]
    Keyword(#[from] KeywordError),
    #[error("Parameter conversion failed")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn check_range(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Named, bounded parameter set.
pub trait Parameters: Serialize + DeserializeOwned + Sized {
    fn validate(&self) -> Result<(), ConfigError>;

    fn save_state(&self, kwl: &mut Keywordlist, prefix: &str) -> Result<(), ConfigError> {
        kwl.save_struct(prefix, self)?;
        Ok(())
    }

    /// Reads and validates a parameter set. Absent keywords keep their defaults.
    fn load_state(kwl: &Keywordlist, prefix: &str) -> Result<Self, ConfigError> {
        let loaded: Self = kwl.load_struct(prefix)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Current value of a (dotted) parameter name, JSON encoded.
    fn parameter(&self, name: &str) -> Result<String, ConfigError> {
        let value = serde_json::to_value(self)?;
        let slot = value
            .pointer(&pointer_for(name))
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        Ok(serde_json::to_string(slot)?)
    }

    /// Sets one parameter from text. The update is rejected, and `self`
    /// left untouched, if the result does not validate.
    fn set_parameter(&mut self, name: &str, text: &str) -> Result<(), ConfigError> {
        let mut value = serde_json::to_value(&*self)?;
        let slot = value
            .pointer_mut(&pointer_for(name))
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        *slot = decode_value(text);
        let updated: Self = serde_json::from_value(value)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn pointer_for(name: &str) -> String {
    format!("/{}", name.replace('.', "/"))
}

// =============================================================================
// Corner detection
// =============================================================================

/// Harris corner detector parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarrisConfig {
    /// Trace weight in `det - k * trace^2`. Range [0, 0.25].
    pub k: f64,
    /// Standard deviation of the structure-tensor smoothing, in pixels. Range (0, 20].
    pub gaussian_sigma: f64,
    /// Target corner density, points per pixel of tile area. Range [0, 1].
    /// Values of 1 keep every local maximum, 0 keeps none.
    pub density: f64,
    /// Ties with a neighbour disqualify a local maximum.
    pub strict_maxima: bool,
}

impl Default for HarrisConfig {
    fn default() -> Self {
        Self {
            k: 0.05,
            gaussian_sigma: 1.0,
            density: 0.003,
            strict_maxima: true,
        }
    }
}

impl Parameters for HarrisConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("k", self.k, 0.0, 0.25)?;
        check_range("gaussian_sigma", self.gaussian_sigma, f64::MIN_POSITIVE, 20.0)?;
        check_range("density", self.density, 0.0, 1.0)
    }
}

// =============================================================================
// Chip matching
// =============================================================================

/// Patch correlation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipMatchConfig {
    /// Half size of the master patch; the patch is `2r + 1` pixels square. Range [0, 50].
    pub match_radius: usize,
    /// Extra half size of the slave search window. Range [0, 100].
    pub slave_accuracy: usize,
    /// Expected displacement applied before searching. Rounded to whole pixels.
    pub bias: DVec2,
    /// Minimum NCC score for a tie point to be kept. Range [-1, 1].
    pub min_score: f64,
}

impl Default for ChipMatchConfig {
    fn default() -> Self {
        Self {
            match_radius: 10,
            slave_accuracy: 8,
            bias: DVec2::ZERO,
            min_score: 0.7,
        }
    }
}

impl ChipMatchConfig {
    /// Bias rounded to the whole-pixel offset the slave window is moved by.
    pub fn integer_bias(&self) -> (i64, i64) {
        (self.bias.x.round() as i64, self.bias.y.round() as i64)
    }
}

impl Parameters for ChipMatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_range("match_radius", self.match_radius as f64, 0.0, 50.0)?;
        check_range("slave_accuracy", self.slave_accuracy as f64, 0.0, 100.0)?;
        if !self.bias.is_finite() {
            return Err(ConfigError::Invalid {
                name: "bias",
                reason: "must be finite".to_string(),
            });
        }
        check_range("min_score", self.min_score, -1.0, 1.0)
    }
}

// =============================================================================
// Outlier rejection
// =============================================================================

/// RANSAC outlier rejection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Expected fraction of correct tie points. Range (0, 1].
    pub inlier_ratio: f64,
    /// Maximum residual of an inlier, in slave pixels. Must be positive.
    pub image_accuracy: f64,
    /// Probability of drawing at least one all-inlier sample within the
    /// iteration cap. Range (0, 1).
    pub success_probability: f64,
    /// Standard deviations added to the expected iteration count.
    pub z_score: f64,
    /// Random seed for reproducibility (None for random).
    pub seed: Option<u64>,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            inlier_ratio: 0.6,
            image_accuracy: 1.0,
            success_probability: 0.97,
            z_score: 2.2,
            seed: None,
        }
    }
}

impl Parameters for RansacConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.inlier_ratio > 0.0 && self.inlier_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "inlier_ratio",
                value: self.inlier_ratio,
                min: 0.0,
                max: 1.0,
            });
        }
        if !(self.image_accuracy > 0.0 && self.image_accuracy.is_finite()) {
            return Err(ConfigError::Invalid {
                name: "image_accuracy",
                reason: format!("must be positive, got {}", self.image_accuracy),
            });
        }
        if !(self.success_probability > 0.0 && self.success_probability < 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "success_probability",
                value: self.success_probability,
                min: 0.0,
                max: 1.0,
            });
        }
        check_range("z_score", self.z_score, 0.0, 10.0)
    }
}

// =============================================================================
// Correlator
// =============================================================================

/// Which input supplies the working map geometry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectionRole {
    #[default]
    Master,
    Slave,
}

/// Outlier rejection stage run after tie-point generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectionConfig {
    pub model: ModelKind,
    pub ransac: RansacConfig,
    /// Target residual variance (pixel^2) for the final refit of iterative models.
    pub target_variance: Option<f64>,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Affine,
            ransac: RansacConfig::default(),
            target_variance: None,
        }
    }
}

/// End-to-end correlation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub master_path: PathBuf,
    pub slave_path: PathBuf,
    /// Band used from each input; out-of-range indices fall back to band 0.
    pub master_band: usize,
    pub slave_band: usize,
    /// Input whose projection defines the working geometry.
    pub projection_role: ProjectionRole,
    /// Working resolution relative to the chosen input. Range (0, 10].
    pub scale_ratio: f64,
    /// Harris `k`. Range [0, 0.25].
    pub harris_k: f64,
    /// Corner density per working pixel. Range [0, 1].
    pub density: f64,
    /// Master patch half size in working pixels. Range [0, 50].
    pub match_radius: usize,
    /// Search margin in pixels of the chosen input; scaled by `scale_ratio`.
    pub slave_accuracy: f64,
    /// Minimum correlation score. Range [-1, 1].
    pub min_score: f64,
    /// Vertical standard deviation assigned to ground points, metres.
    pub vertical_accuracy: f64,
    /// Restricts tiling to this working-pixel rectangle.
    pub area: Option<PixelRect>,
    /// Tiling size; defaults to the working chain's natural tile size.
    pub tile_size: Option<usize>,
    /// Blocks held by each cache in the rendering chains.
    pub cache_blocks: usize,
    /// Tab-delimited stream of raw tie points.
    pub tie_stream_path: Option<PathBuf>,
    /// Tie-point set export (`.json` or `.yaml`).
    pub export_path: Option<PathBuf>,
    pub rejection: Option<RejectionConfig>,
    /// Keyword file receiving the fitted model after outlier rejection.
    pub model_path: Option<PathBuf>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            master_path: PathBuf::new(),
            slave_path: PathBuf::new(),
            master_band: 0,
            slave_band: 0,
            projection_role: ProjectionRole::Master,
            scale_ratio: 1.0,
            harris_k: 0.05,
            density: 0.003,
            match_radius: 10,
            slave_accuracy: 8.0,
            min_score: 0.7,
            vertical_accuracy: 100.0,
            area: None,
            tile_size: None,
            cache_blocks: 64,
            tie_stream_path: None,
            export_path: None,
            rejection: None,
            model_path: None,
        }
    }
}

impl CorrelatorConfig {
    /// Structure-tensor smoothing tied to the patch size.
    pub fn harris_sigma(&self) -> f64 {
        (self.match_radius as f64 / 3.0).max(0.5)
    }

    /// Search margin expressed in working pixels.
    pub fn working_accuracy(&self) -> usize {
        (self.slave_accuracy * self.scale_ratio).ceil() as usize
    }

    pub fn harris_config(&self) -> HarrisConfig {
        HarrisConfig {
            k: self.harris_k,
            gaussian_sigma: self.harris_sigma(),
            density: self.density,
            strict_maxima: true,
        }
    }

    pub fn chip_match_config(&self) -> ChipMatchConfig {
        ChipMatchConfig {
            match_radius: self.match_radius,
            slave_accuracy: self.working_accuracy(),
            bias: DVec2::ZERO,
            min_score: self.min_score,
        }
    }
}

impl Parameters for CorrelatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.master_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                name: "master_path",
                reason: "must be set".to_string(),
            });
        }
        if self.slave_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                name: "slave_path",
                reason: "must be set".to_string(),
            });
        }
        if !(self.scale_ratio > 0.0 && self.scale_ratio <= 10.0) {
            return Err(ConfigError::OutOfRange {
                name: "scale_ratio",
                value: self.scale_ratio,
                min: 0.0,
                max: 10.0,
            });
        }
        check_range("slave_accuracy", self.slave_accuracy, 0.0, 100.0)?;
        check_range("vertical_accuracy", self.vertical_accuracy, 0.0, f64::MAX)?;
        if self.tile_size == Some(0) {
            return Err(ConfigError::Invalid {
                name: "tile_size",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(rejection) = &self.rejection {
            rejection.ransac.validate()?;
        }
        self.harris_config().validate()?;
        self.chip_match_config().validate()
    }
}
