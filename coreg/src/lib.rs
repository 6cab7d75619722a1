//! Coreg - automatic image-to-image registration.
//!
//! Finds tie points between a master and a slave raster and prepares them
//! as ground control for geo-referencing the slave:
//! - Harris corner detection on the master
//! - FFT normalized cross-correlation of patches with sub-pixel refinement
//! - Tiled, streaming tie-point generation with progress and cancellation
//! - RANSAC outlier rejection against an optimizable geometric model
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use coreg::{Correlator, CorrelatorConfig, ImageFileOpener};
//!
//! let config = CorrelatorConfig {
//!     master_path: "master.png".into(),
//!     slave_path: "slave.png".into(),
//!     export_path: Some("ties.json".into()),
//!     ..Default::default()
//! };
//! let report = Correlator::new(config, Box::new(ImageFileOpener::default()))?.run()?;
//! println!("{} tie points", report.ties.len());
//! ```

pub mod chip_match;
pub mod config;
pub mod corners;
pub mod correlator;
pub mod keywords;
pub mod model;
pub mod projection;
pub mod ransac;
pub mod raster;
pub mod tie_gen;
pub mod tie_set;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    ChipMatchConfig, ConfigError, CorrelatorConfig, HarrisConfig, Parameters, ProjectionRole,
    RansacConfig, RejectionConfig,
};
pub use keywords::{KeywordError, Keywordlist};

// ============================================================================
// Rasters and geometry
// ============================================================================

pub use projection::{GeoTransform, ProjectionError};
pub use raster::{
    ImageFileOpener, ImageSource, MemoryCatalog, MemoryImage, PixelRect, RasterError,
    RasterOpener, RasterTile,
};

// ============================================================================
// Matching
// ============================================================================

pub use chip_match::{ChipMatcher, MatchStats, NccCorrelator, PatchMatch, TiePointSource};
pub use corners::HarrisCorners;
pub use tie_gen::{
    AbortHandle, ProgressCallback, TieGenError, TieGenProgress, TieGenSummary, TieGenerator,
    TieSink,
};
pub use tie_set::{TieGpt, TieGptSet, TiePoint, TieSetError};

// ============================================================================
// Fitting and orchestration
// ============================================================================

pub use correlator::{CorrelationReport, Correlator, CorrelatorError, DisplacementStats};
pub use model::{GeometricModel, ModelKind, OptimizableModel};
pub use ransac::{OutlierRejector, RansacError, RansacOutcome};
