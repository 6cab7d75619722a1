//! Harris corner detection.
//!
//! Produces a single-band cornerness map: zero where a pixel is not a
//! candidate, the positive Harris response at retained local maxima. Each
//! tile is computed from an input window padded by the filter footprints,
//! so results do not depend on how the area is tiled except for the final
//! per-tile density thinning.

pub mod filters;
pub mod maxima;


use common::Buffer2;

use crate::config::{ConfigError, HarrisConfig, Parameters};
use crate::projection::GeoTransform;
use crate::raster::{ImageSource, PixelRect, RasterError, RasterTile, ScalarType};

pub use maxima::{count_candidates, local_maxima, thin_to_density};

/// No-data value of cornerness tiles.
pub const CORNER_NULL: f64 = 0.0;

#[derive(Default)]
struct Workspace {
    dx: Buffer2<f64>,
    dy: Buffer2<f64>,
    xx: Buffer2<f64>,
    xy: Buffer2<f64>,
    yy: Buffer2<f64>,
    scratch: Buffer2<f64>,
}

/// Cornerness filter over the first band of `source`.
pub struct HarrisCorners<S> {
    source: S,
    config: HarrisConfig,
    kernel: Vec<f64>,
    work: Workspace,
}

impl<S: ImageSource> HarrisCorners<S> {
    pub fn new(source: S, config: HarrisConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let kernel = filters::gaussian_kernel_1d(config.gaussian_sigma);
        Ok(Self {
            source,
            config,
            kernel,
            work: Workspace::default(),
        })
    }

    pub fn config(&self) -> &HarrisConfig {
        &self.config
    }

    /// Input padding needed around a tile: derivative, smoothing and maxima footprints.
    pub fn margin(&self) -> usize {
        self.kernel.len() / 2 + 2
    }

    /// Response map of a NaN-masked buffer after local-maximum suppression.
    ///
    /// Pixels within `margin()` of the buffer edge are always no-data.
    pub fn cornerness(&mut self, input: &Buffer2<f64>) -> Buffer2<f64> {
        let w = &mut self.work;
        filters::derivatives(input, &mut w.dx, &mut w.dy);
        filters::gradient_products(&w.dx, &w.dy, &mut w.xx, &mut w.xy, &mut w.yy);
        filters::smooth_strict(&mut w.xx, &self.kernel, &mut w.scratch);
        filters::smooth_strict(&mut w.xy, &self.kernel, &mut w.scratch);
        filters::smooth_strict(&mut w.yy, &self.kernel, &mut w.scratch);
        filters::harris_response(&mut w.xx, &w.xy, &w.yy, self.config.k);
        local_maxima(&w.xx, self.config.strict_maxima)
    }
}

impl<S: ImageSource> ImageSource for HarrisCorners<S> {
    fn bounds(&self) -> PixelRect {
        self.source.bounds()
    }

    fn band_count(&self) -> usize {
        1
    }

    fn scalar_type(&self) -> ScalarType {
        ScalarType::F64
    }

    fn null_value(&self, _band: usize) -> f64 {
        CORNER_NULL
    }

    fn tile_size(&self) -> (usize, usize) {
        self.source.tile_size()
    }

    fn projection(&self) -> Option<GeoTransform> {
        self.source.projection()
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        crate::raster::check_request(rect, level, 0)?;

        let margin = self.margin();
        let input = self.source.tile(rect.expand(margin), 0)?.working_band(0);
        let response = self.cornerness(&input);

        let mut map = response.crop(margin, margin, rect.width, rect.height);
        let candidates = count_candidates(&map);
        let survivors = thin_to_density(&mut map, self.config.density);
        tracing::trace!("Corner tile {}: {} maxima, {} kept", rect, candidates, survivors);

        for v in map.iter_mut() {
            if v.is_nan() {
                *v = CORNER_NULL;
            }
        }
        Ok(RasterTile::from_bands(
            rect,
            ScalarType::F64,
            vec![CORNER_NULL],
            vec![map],
        ))
    }
}
