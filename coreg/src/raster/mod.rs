//! Raster access: the image-source contract and the filters the
//! correlator chains together (band selection, caching, resampling).

pub mod band_select;
pub mod cache;
pub mod file;
pub mod memory;
pub mod rect;
pub mod resample;
pub mod tile;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::projection::{GeoTransform, ProjectionError};

pub use band_select::BandSelector;
pub use cache::TileCache;
pub use file::ImageFileOpener;
pub use memory::{MemoryCatalog, MemoryImage};
pub use rect::PixelRect;
pub use resample::Resampler;
pub use tile::{Coverage, RasterTile, ScalarType};

/// Tile edge used when a source has no natural blocking.
pub const DEFAULT_TILE_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("Empty tile request {0}")]
    EmptyRect(PixelRect),
    #[error("Resolution level {0} is not supported by this source")]
    UnsupportedLevel(usize),
    #[error("Source has no map projection")]
    NoProjection,
    #[error("Raster not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read raster")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode raster")]
    Decode(#[from] image::ImageError),
    #[error("Invalid geo-referencing")]
    Projection(#[from] ProjectionError),
}

/// Pull-based raster source.
///
/// `tile` returns samples for `rect` at resolution `level` (level 0 is full
/// resolution, each level halves both axes). Pixels outside the source
/// bounds come back as no-data.
pub trait ImageSource {
    fn bounds(&self) -> PixelRect;

    fn band_count(&self) -> usize;

    fn scalar_type(&self) -> ScalarType;

    fn null_value(&self, band: usize) -> f64;

    fn tile_size(&self) -> (usize, usize) {
        (DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE)
    }

    fn projection(&self) -> Option<GeoTransform> {
        None
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError>;

    fn null_values(&self) -> Vec<f64> {
        (0..self.band_count()).map(|b| self.null_value(b)).collect()
    }
}

impl<S: ImageSource + ?Sized> ImageSource for Box<S> {
    fn bounds(&self) -> PixelRect {
        (**self).bounds()
    }

    fn band_count(&self) -> usize {
        (**self).band_count()
    }

    fn scalar_type(&self) -> ScalarType {
        (**self).scalar_type()
    }

    fn null_value(&self, band: usize) -> f64 {
        (**self).null_value(band)
    }

    fn tile_size(&self) -> (usize, usize) {
        (**self).tile_size()
    }

    fn projection(&self) -> Option<GeoTransform> {
        (**self).projection()
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        (**self).tile(rect, level)
    }
}

/// Lets one chain feed several consumers on the same thread.
impl<S: ImageSource + ?Sized> ImageSource for Rc<RefCell<S>> {
    fn bounds(&self) -> PixelRect {
        self.borrow().bounds()
    }

    fn band_count(&self) -> usize {
        self.borrow().band_count()
    }

    fn scalar_type(&self) -> ScalarType {
        self.borrow().scalar_type()
    }

    fn null_value(&self, band: usize) -> f64 {
        self.borrow().null_value(band)
    }

    fn tile_size(&self) -> (usize, usize) {
        self.borrow().tile_size()
    }

    fn projection(&self) -> Option<GeoTransform> {
        self.borrow().projection()
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        self.borrow_mut().tile(rect, level)
    }
}

/// Opens raster handles by path.
pub trait RasterOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageSource>, RasterError>;
}

pub(crate) fn check_request(rect: PixelRect, level: usize, max_level: usize) -> Result<(), RasterError> {
    if rect.is_empty() {
        return Err(RasterError::EmptyRect(rect));
    }
    if level > max_level {
        return Err(RasterError::UnsupportedLevel(level));
    }
    Ok(())
}
