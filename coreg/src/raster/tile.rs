//! Raster tiles handed out by image sources.

use common::Buffer2;
use serde::{Deserialize, Serialize};

use super::rect::PixelRect;

/// Native sample type of a raster. Samples are always carried as `f64`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScalarType {
    U8,
    U16,
    F32,
    F64,
}

/// How much of a tile band holds valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Empty,
    Partial,
    Full,
}

/// Multi-band block of samples covering `rect`.
///
/// A sample is no-data when it is NaN or equal to the band's null value.
#[derive(Debug, Clone)]
pub struct RasterTile {
    rect: PixelRect,
    scalar_type: ScalarType,
    null_values: Vec<f64>,
    bands: Vec<Buffer2<f64>>,
}

impl RasterTile {
    /// Tile with one band per null value, every sample set to its band's null.
    pub fn new_null(rect: PixelRect, scalar_type: ScalarType, null_values: Vec<f64>) -> Self {
        let bands = null_values
            .iter()
            .map(|&null| Buffer2::new_filled(rect.width, rect.height, null))
            .collect();
        Self {
            rect,
            scalar_type,
            null_values,
            bands,
        }
    }

    pub fn from_bands(
        rect: PixelRect,
        scalar_type: ScalarType,
        null_values: Vec<f64>,
        bands: Vec<Buffer2<f64>>,
    ) -> Self {
        assert_eq!(
            null_values.len(),
            bands.len(),
            "one null value per band required"
        );
        for band in &bands {
            assert!(
                band.width() == rect.width && band.height() == rect.height,
                "band size must match tile rect"
            );
        }
        Self {
            rect,
            scalar_type,
            null_values,
            bands,
        }
    }

    #[inline]
    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    #[inline]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    #[inline]
    pub fn null_value(&self, band: usize) -> f64 {
        self.null_values[band]
    }

    #[inline]
    pub fn band(&self, band: usize) -> &Buffer2<f64> {
        &self.bands[band]
    }

    #[inline]
    pub fn band_mut(&mut self, band: usize) -> &mut Buffer2<f64> {
        &mut self.bands[band]
    }

    pub fn into_bands(self) -> Vec<Buffer2<f64>> {
        self.bands
    }

    #[inline]
    pub fn is_null_value(&self, band: usize, value: f64) -> bool {
        value.is_nan() || value == self.null_values[band]
    }

    /// Valid sample at absolute pixel (x, y), `None` outside the tile or on no-data.
    #[inline]
    pub fn get(&self, band: usize, x: i64, y: i64) -> Option<f64> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let value = self.bands[band][((x - self.rect.x0) as usize, (y - self.rect.y0) as usize)];
        (!self.is_null_value(band, value)).then_some(value)
    }

    /// Writes a sample at absolute pixel (x, y). Ignored outside the tile.
    #[inline]
    pub fn set(&mut self, band: usize, x: i64, y: i64, value: f64) {
        if self.rect.contains(x, y) {
            let local = ((x - self.rect.x0) as usize, (y - self.rect.y0) as usize);
            self.bands[band][local] = value;
        }
    }

    pub fn coverage(&self, band: usize) -> Coverage {
        let nulls = self.bands[band]
            .iter()
            .filter(|&&v| self.is_null_value(band, v))
            .count();
        if nulls == 0 {
            Coverage::Full
        } else if nulls == self.rect.area() {
            Coverage::Empty
        } else {
            Coverage::Partial
        }
    }

    /// Copy of one band with every no-data sample replaced by NaN.
    pub fn working_band(&self, band: usize) -> Buffer2<f64> {
        self.bands[band].map(|&v| if self.is_null_value(band, v) { f64::NAN } else { v })
    }

    /// Copies the overlapping samples of `other` into this tile.
    pub fn copy_overlap(&mut self, other: &RasterTile) {
        let Some(overlap) = self.rect.intersect(&other.rect) else {
            return;
        };
        let bands = self.band_count().min(other.band_count());
        for band in 0..bands {
            for y in overlap.y0..overlap.y1() {
                let src_y = (y - other.rect.y0) as usize;
                let dst_y = (y - self.rect.y0) as usize;
                let src_x = (overlap.x0 - other.rect.x0) as usize;
                let dst_x = (overlap.x0 - self.rect.x0) as usize;
                let src = &other.bands[band].row(src_y)[src_x..src_x + overlap.width];
                let null_src = other.null_values[band];
                let null_dst = self.null_values[band];
                let dst = &mut self.bands[band].row_mut(dst_y)[dst_x..dst_x + overlap.width];
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = if s.is_nan() || s == null_src { null_dst } else { s };
                }
            }
        }
    }
}
