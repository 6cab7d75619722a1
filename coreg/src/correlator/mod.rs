//! End-to-end correlation of a master and a slave raster.
//!
//! # Stages
//!
//! 1. **Setup** - open both inputs, pick a band from each and derive the
//!    common working geometry. Every failure here is fatal and happens
//!    before any tile is read.
//! 2. **Rendering chains** - `cache -> resample -> cache` per input, with the
//!    master chain shared by the corner detector and the chip matcher.
//! 3. **Tie generation** - chip matching over the working area, tile by tile.
//! 4. **Statistics** - displacement mean, covariance and error ellipse.
//! 5. **Ground control** - tie points converted to ground/slave-pixel pairs
//!    with fixed covariances.
//! 6. **Outlier rejection** (optional) - RANSAC fit of a geometric model.
//! 7. **Export** - tie-point set and fitted model.

mod stats;


use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::{DVec2, DVec3};

use crate::chip_match::ChipMatcher;
use crate::config::{ConfigError, CorrelatorConfig, Parameters, ProjectionRole};
use crate::corners::HarrisCorners;
use crate::keywords::{KeywordError, Keywordlist};
use crate::model::{GeometricModel, OptimizableModel};
use crate::projection::GeoTransform;
use crate::ransac::{OutlierRejector, RansacError, RansacOutcome};
use crate::raster::{
    BandSelector, ImageSource, PixelRect, RasterError, RasterOpener, Resampler, TileCache,
};
use crate::tie_gen::{AbortHandle, ProgressCallback, TieGenError, TieGenSummary, TieGenerator, TieSink};
use crate::tie_set::{TieGpt, TieGptSet, TiePoint, TieSetError};

pub use stats::DisplacementStats;

/// Which input a setup failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Input {
    Master,
    Slave,
}

#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("Invalid correlator configuration")]
    Config(#[from] ConfigError),
    #[error("Failed to open {input} image {path}")]
    Open {
        input: Input,
        path: PathBuf,
        #[source]
        source: RasterError,
    },
    #[error("The {input} image has no map projection")]
    NoProjection { input: Input },
    #[error("The {input} image projection cannot be inverted")]
    InvalidProjection { input: Input },
    #[error("Failed to build the {input} rendering chain")]
    Chain {
        input: Input,
        #[source]
        source: RasterError,
    },
    #[error("Working area {area:?} does not overlap both inputs (master {master}, slave {slave})")]
    NoOverlap {
        master: PixelRect,
        slave: PixelRect,
        area: Option<PixelRect>,
    },
    #[error("Tie-point generation failed")]
    TieGen(#[from] TieGenError),
    #[error("Tie-point export failed")]
    Export(#[from] TieSetError),
    #[error("Failed to save the fitted model")]
    ModelSave(#[from] KeywordError),
}

/// Everything a correlation run produced.
#[derive(Debug)]
pub struct CorrelationReport {
    /// Working map geometry both inputs were resampled into.
    pub geometry: GeoTransform,
    pub tie_gen: TieGenSummary,
    /// `None` when no tie point was found.
    pub stats: Option<DisplacementStats>,
    /// Ground-control tie points, reduced to inliers when rejection succeeded.
    pub ties: TieGptSet,
    /// Outcome of outlier rejection, if configured.
    pub rejection: Option<Result<RansacOutcome, RansacError>>,
    /// Model fitted by a successful rejection.
    pub model: Option<GeometricModel>,
}

/// Image-to-image correlator.
pub struct Correlator {
    config: CorrelatorConfig,
    opener: Box<dyn RasterOpener>,
    abort: AbortHandle,
    progress: ProgressCallback,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig, opener: Box<dyn RasterOpener>) -> Result<Self, CorrelatorError> {
        config.validate()?;
        Ok(Self {
            config,
            opener,
            abort: AbortHandle::default(),
            progress: None,
        })
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Handle that stops tie generation at the next tile boundary. The
    /// request is cleared once tie generation returns.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = callback;
    }

    pub fn run(&self) -> Result<CorrelationReport, CorrelatorError> {
        let config = &self.config;

        // Setup
        let master = self.open(Input::Master, &config.master_path, config.master_band)?;
        let slave = self.open(Input::Slave, &config.slave_path, config.slave_band)?;
        let master_geometry = input_geometry(Input::Master, master.projection())?;
        let slave_geometry = input_geometry(Input::Slave, slave.projection())?;
        let geometry = match config.projection_role {
            ProjectionRole::Master => master_geometry,
            ProjectionRole::Slave => slave_geometry,
        }
        .rescaled(config.scale_ratio);
        tracing::info!(
            "Working geometry from {} image at scale {}: {:.3} m/pixel",
            config.projection_role,
            config.scale_ratio,
            geometry.mean_meters_per_pixel()
        );

        // Rendering chains
        let master_chain: Rc<RefCell<Box<dyn ImageSource>>> =
            Rc::new(RefCell::new(self.chain(Input::Master, master, geometry)?));
        let slave_chain = self.chain(Input::Slave, slave, geometry)?;

        let master_bounds = master_chain.bounds();
        let slave_bounds = slave_chain.bounds();
        let overlap = master_bounds.intersect(&slave_bounds);
        let area = match (overlap, config.area) {
            (Some(overlap), Some(area)) => area.intersect(&overlap),
            (overlap, _) => overlap,
        };
        let Some(area) = area else {
            return Err(CorrelatorError::NoOverlap {
                master: master_bounds,
                slave: slave_bounds,
                area: config.area,
            });
        };

        let corners = HarrisCorners::new(master_chain.clone(), config.harris_config())?;
        let matcher = ChipMatcher::new(
            Box::new(corners),
            Box::new(master_chain),
            Box::new(slave_chain),
            config.chip_match_config(),
        )?;

        // Tie generation
        let mut generator = TieGenerator::new(Box::new(matcher));
        generator.set_area(Some(area));
        generator.set_tile_size(config.tile_size.map(|t| (t, t)));
        generator.set_abort_handle(self.abort.clone());
        generator.set_progress_callback(self.progress.clone());
        if let Some(path) = &config.tie_stream_path {
            generator.set_sink(TieSink::create(path)?, Some(geometry));
        }
        let tie_gen = generator.run()?;
        let ties = generator.take_ties();

        let stats = DisplacementStats::compute(&ties);
        match &stats {
            Some(stats) => tracing::info!("Displacement: {}", stats),
            None => tracing::warn!("No tie points found"),
        }

        // Ground control
        let mut set = self.ground_control(&ties, &geometry, &slave_geometry);

        let mut rejection = None;
        let mut fitted = None;
        if let Some(rejection_config) = &config.rejection {
            let mut model = GeometricModel::new(rejection_config.model, slave_geometry);
            let outcome = OutlierRejector::new(rejection_config.ransac.clone())
                .map_err(RansacError::from)
                .and_then(|rejector| {
                    rejector.reject(&mut set, &mut model, rejection_config.target_variance)
                });
            match &outcome {
                Ok(_) => fitted = Some(model),
                Err(err) => tracing::warn!("Outlier rejection failed, keeping all tie points: {}", err),
            }
            rejection = Some(outcome);
        }

        // Export
        if let Some(path) = &config.export_path {
            set.save(path)?;
        }
        if let (Some(path), Some(model)) = (&config.model_path, &fitted) {
            let mut kwl = Keywordlist::new();
            model.save_state(&mut kwl, "model")?;
            kwl.write_file(path)?;
            tracing::info!("Saved {} model to {}", model.kind(), path.display());
        }

        Ok(CorrelationReport {
            geometry,
            tie_gen,
            stats,
            ties: set,
            rejection,
            model: fitted,
        })
    }

    fn open(
        &self,
        input: Input,
        path: &Path,
        band: usize,
    ) -> Result<BandSelector<Box<dyn ImageSource>>, CorrelatorError> {
        let source = self
            .opener
            .open(path)
            .map_err(|source| CorrelatorError::Open {
                input,
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(
            "Opened {} image {}: {} with {} bands",
            input,
            path.display(),
            source.bounds(),
            source.band_count()
        );
        Ok(BandSelector::new(source, band))
    }

    /// `cache -> resample -> cache` into the working geometry.
    fn chain(
        &self,
        input: Input,
        source: BandSelector<Box<dyn ImageSource>>,
        geometry: GeoTransform,
    ) -> Result<Box<dyn ImageSource>, CorrelatorError> {
        let blocks = self.config.cache_blocks;
        let resampled = Resampler::new(TileCache::new(source, blocks), geometry)
            .map_err(|source| CorrelatorError::Chain { input, source })?;
        Ok(Box::new(TileCache::new(resampled, blocks)))
    }

    /// Converts working-pixel tie points to ground/slave-pixel pairs.
    fn ground_control(
        &self,
        ties: &[TiePoint],
        geometry: &GeoTransform,
        slave_geometry: &GeoTransform,
    ) -> TieGptSet {
        let config = &self.config;
        let mut set = TieGptSet::new(
            config.master_path.display().to_string(),
            config.slave_path.display().to_string(),
        );
        set.set_image_sigma(0.5 / config.scale_ratio);
        set.set_ground_sigma(geometry.mean_meters_per_pixel(), config.vertical_accuracy);
        set.ties = ties
            .iter()
            .map(|tie| {
                let ground = geometry.pixel_to_world(tie.master);
                TieGpt {
                    ground: DVec3::new(ground.x, ground.y, 0.0),
                    slave: slave_pixel(geometry, slave_geometry, tie.master, tie.displacement),
                    score: tie.score,
                }
            })
            .collect();
        set
    }
}

fn input_geometry(input: Input, projection: Option<GeoTransform>) -> Result<GeoTransform, CorrelatorError> {
    let geometry = projection.ok_or(CorrelatorError::NoProjection { input })?;
    if !geometry.is_invertible() {
        return Err(CorrelatorError::InvalidProjection { input });
    }
    Ok(geometry)
}

/// Slave pixel seen at `master` plus `displacement` in the working geometry.
pub fn slave_pixel(
    geometry: &GeoTransform,
    slave_geometry: &GeoTransform,
    master: DVec2,
    displacement: DVec2,
) -> DVec2 {
    slave_geometry.world_to_pixel(geometry.pixel_to_world(master + displacement))
}
