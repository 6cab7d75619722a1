//! Chip matching: locating each corner of the master image in the slave
//! image by patch correlation.
//!
//! For every candidate pixel of a cornerness tile, a `(2r+1)^2` master patch
//! is correlated against a `(2(r+a)+1)^2` slave window centred on the same
//! pixel moved by the bias. The integer NCC peak is refined to sub-pixel
//! precision when it lies strictly inside the search window.

pub mod ncc;
pub mod subpixel;


use common::Buffer2;
use glam::DVec2;

use crate::config::{ChipMatchConfig, ConfigError, Parameters};
use crate::raster::{ImageSource, PixelRect, RasterError, RasterTile};
use crate::tie_set::TiePoint;

pub use ncc::NccCorrelator;
pub use subpixel::{refine_peak, Quadratic};

/// Producer of tie points, one tile at a time.
pub trait TiePointSource {
    /// Area over which tie points can be requested.
    fn bounds(&self) -> PixelRect;

    /// Natural tiling of the source.
    fn tile_size(&self) -> (usize, usize);

    /// Tie points whose master position lies in `rect`. The slice is only
    /// valid until the next request.
    fn tie_points(&mut self, rect: PixelRect) -> Result<&[TiePoint], RasterError>;
}

impl<T: TiePointSource + ?Sized> TiePointSource for Box<T> {
    fn bounds(&self) -> PixelRect {
        (**self).bounds()
    }

    fn tile_size(&self) -> (usize, usize) {
        (**self).tile_size()
    }

    fn tie_points(&mut self, rect: PixelRect) -> Result<&[TiePoint], RasterError> {
        (**self).tie_points(rect)
    }
}

/// Best match of one master patch inside a slave window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchMatch {
    /// Offset from the window centre to the matched position.
    pub offset: DVec2,
    pub score: f64,
    pub refined: bool,
}

/// Correlates `master` against the centred `slave` window and locates the peak.
///
/// Returns `None` for degenerate inputs (flat master, non-finite samples).
pub fn match_patch(
    ncc: &mut NccCorrelator,
    master: &Buffer2<f64>,
    slave: &Buffer2<f64>,
) -> Option<PatchMatch> {
    let surface = ncc.correlate(master, slave)?;

    let mut peak = (0, 0);
    let mut best = f64::NEG_INFINITY;
    for y in 0..surface.height() {
        for (x, &v) in surface.row(y).iter().enumerate() {
            if v > best {
                best = v;
                peak = (x, y);
            }
        }
    }

    let centre = DVec2::new(
        (surface.width() / 2) as f64,
        (surface.height() / 2) as f64,
    );
    let integer = DVec2::new(peak.0 as f64, peak.1 as f64) - centre;
    let found = match refine_peak(&surface, peak.0, peak.1) {
        Some((sub, score)) => PatchMatch {
            offset: integer + sub,
            score,
            refined: true,
        },
        None => PatchMatch {
            offset: integer,
            score: best,
            refined: false,
        },
    };
    Some(found)
}

/// Counters of one tile request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub candidates: usize,
    pub incomplete_master: usize,
    pub incomplete_slave: usize,
    /// Flat or non-finite patches with no correlation peak.
    pub degenerate: usize,
    pub below_threshold: usize,
    pub refined: usize,
}

/// Tie-point source correlating master corners against the slave image.
///
/// All three inputs share the master's working pixel grid.
pub struct ChipMatcher {
    corners: Box<dyn ImageSource>,
    master: Box<dyn ImageSource>,
    slave: Box<dyn ImageSource>,
    config: ChipMatchConfig,
    ncc: NccCorrelator,
    ties: Vec<TiePoint>,
    stats: MatchStats,
}

impl ChipMatcher {
    pub fn new(
        corners: Box<dyn ImageSource>,
        master: Box<dyn ImageSource>,
        slave: Box<dyn ImageSource>,
        config: ChipMatchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            corners,
            master,
            slave,
            config,
            ncc: NccCorrelator::new(),
            ties: Vec::new(),
            stats: MatchStats::default(),
        })
    }

    pub fn config(&self) -> &ChipMatchConfig {
        &self.config
    }

    /// Counters of the last request.
    pub fn stats(&self) -> MatchStats {
        self.stats
    }

    pub fn correlator(&self) -> &NccCorrelator {
        &self.ncc
    }

    fn find_ties(&mut self, rect: PixelRect) -> Result<(), RasterError> {
        self.ties.clear();
        self.stats = MatchStats::default();

        let r = self.config.match_radius;
        let search = r + self.config.slave_accuracy;
        let (bx, by) = self.config.integer_bias();
        let bias = DVec2::new(bx as f64, by as f64);

        let corners = self.corners.tile(rect, 0)?;
        let candidates: Vec<(i64, i64)> = (rect.y0..rect.y1())
            .flat_map(|y| (rect.x0..rect.x1()).map(move |x| (x, y)))
            .filter(|&(x, y)| corners.get(0, x, y).is_some_and(|v| v > 0.0))
            .collect();
        self.stats.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(());
        }

        // One fetch per input covers every patch of the tile.
        let master_tile = self.master.tile(rect.expand(r), 0)?;
        let slave_tile = self.slave.tile(rect.translate(bx, by).expand(search), 0)?;

        for (x, y) in candidates {
            let Some(master) = full_patch(&master_tile, PixelRect::centered(x, y, r)) else {
                self.stats.incomplete_master += 1;
                continue;
            };
            let Some(slave) = full_patch(&slave_tile, PixelRect::centered(x + bx, y + by, search)) else {
                self.stats.incomplete_slave += 1;
                continue;
            };

            let Some(found) = match_patch(&mut self.ncc, &master, &slave) else {
                self.stats.degenerate += 1;
                continue;
            };
            if found.score < self.config.min_score {
                self.stats.below_threshold += 1;
                continue;
            }
            if found.refined {
                self.stats.refined += 1;
            }
            self.ties.push(TiePoint::new(
                DVec2::new(x as f64, y as f64),
                bias + found.offset,
                found.score,
            ));
        }
        Ok(())
    }
}

impl TiePointSource for ChipMatcher {
    fn bounds(&self) -> PixelRect {
        let corners = self.corners.bounds();
        self.master
            .bounds()
            .intersect(&self.slave.bounds())
            .and_then(|r| r.intersect(&corners))
            .unwrap_or_default()
    }

    fn tile_size(&self) -> (usize, usize) {
        self.master.tile_size()
    }

    fn tie_points(&mut self, rect: PixelRect) -> Result<&[TiePoint], RasterError> {
        self.find_ties(rect)?;
        let s = self.stats;
        tracing::debug!(
            "Chip match {}: {} candidates, {} ties ({} refined), skipped {} master / {} slave incomplete, {} degenerate, {} below score",
            rect,
            s.candidates,
            self.ties.len(),
            s.refined,
            s.incomplete_master,
            s.incomplete_slave,
            s.degenerate,
            s.below_threshold
        );
        Ok(&self.ties)
    }
}

/// Samples of `tile` over `rect`, or `None` if any of them is no-data.
fn full_patch(tile: &RasterTile, rect: PixelRect) -> Option<Buffer2<f64>> {
    let mut patch = Buffer2::new_filled(rect.width, rect.height, 0.0);
    for y in 0..rect.height {
        for x in 0..rect.width {
            patch[(x, y)] = tile.get(0, rect.x0 + x as i64, rect.y0 + y as i64)?;
        }
    }
    Some(patch)
}
