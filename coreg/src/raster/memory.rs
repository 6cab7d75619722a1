//! In-memory rasters.

use std::path::{Path, PathBuf};

use common::Buffer2;
use hashbrown::HashMap;

use super::{
    check_request, ImageSource, PixelRect, RasterError, RasterOpener, RasterTile, ScalarType,
    DEFAULT_TILE_SIZE,
};
use crate::projection::GeoTransform;

const MAX_LEVEL: usize = 16;

/// Multi-band raster held in memory.
///
/// Reduced-resolution levels are produced by decimation.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    bands: Vec<Buffer2<f64>>,
    scalar_type: ScalarType,
    null_values: Vec<f64>,
    tile_size: (usize, usize),
    projection: Option<GeoTransform>,
}

impl MemoryImage {
    pub fn new(bands: Vec<Buffer2<f64>>) -> Self {
        assert!(!bands.is_empty(), "image needs at least one band");
        let (width, height) = (bands[0].width(), bands[0].height());
        assert!(
            bands
                .iter()
                .all(|b| b.width() == width && b.height() == height),
            "all bands must share dimensions"
        );
        let null_values = vec![f64::NAN; bands.len()];
        Self {
            bands,
            scalar_type: ScalarType::F64,
            null_values,
            tile_size: (DEFAULT_TILE_SIZE, DEFAULT_TILE_SIZE),
            projection: None,
        }
    }

    pub fn single_band(band: Buffer2<f64>) -> Self {
        Self::new(vec![band])
    }

    pub fn with_scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.scalar_type = scalar_type;
        self
    }

    /// Uses `null` as the no-data value of every band.
    pub fn with_null_value(mut self, null: f64) -> Self {
        self.null_values.fill(null);
        self
    }

    pub fn with_tile_size(mut self, width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "tile size must be positive");
        self.tile_size = (width, height);
        self
    }

    pub fn with_projection(mut self, projection: GeoTransform) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn width(&self) -> usize {
        self.bands[0].width()
    }

    pub fn height(&self) -> usize {
        self.bands[0].height()
    }
}

impl ImageSource for MemoryImage {
    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    fn null_value(&self, band: usize) -> f64 {
        self.null_values[band]
    }

    fn tile_size(&self) -> (usize, usize) {
        self.tile_size
    }

    fn projection(&self) -> Option<GeoTransform> {
        self.projection
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        check_request(rect, level, MAX_LEVEL)?;

        let mut tile = RasterTile::new_null(rect, self.scalar_type, self.null_values.clone());
        let step = 1i64 << level;
        let full = self.bounds();
        for (band, samples) in self.bands.iter().enumerate() {
            for y in rect.y0..rect.y1() {
                let sy = y * step;
                for x in rect.x0..rect.x1() {
                    let sx = x * step;
                    if full.contains(sx, sy) {
                        tile.set(band, x, y, samples[(sx as usize, sy as usize)]);
                    }
                }
            }
        }
        Ok(tile)
    }
}

/// Path-keyed collection of in-memory rasters implementing [`RasterOpener`].
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    images: HashMap<PathBuf, MemoryImage>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, image: MemoryImage) {
        self.images.insert(path.into(), image);
    }
}

impl RasterOpener for MemoryCatalog {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageSource>, RasterError> {
        self.images
            .get(path)
            .cloned()
            .map(|image| Box::new(image) as Box<dyn ImageSource>)
            .ok_or_else(|| RasterError::NotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Coverage;

    fn ramp(width: usize, height: usize) -> MemoryImage {
        MemoryImage::single_band(Buffer2::from_fn(width, height, |x, y| (x + 100 * y) as f64))
    }

    #[test]
    fn test_tile_inside_bounds() {
        let mut image = ramp(8, 8);
        let tile = image.tile(PixelRect::new(2, 3, 3, 2), 0).unwrap();
        assert_eq!(tile.coverage(0), Coverage::Full);
        assert_eq!(tile.get(0, 2, 3), Some(302.0));
        assert_eq!(tile.get(0, 4, 4), Some(404.0));
    }

    #[test]
    fn test_tile_outside_bounds_is_null() {
        let mut image = ramp(4, 4);
        let tile = image.tile(PixelRect::new(-2, -2, 4, 4), 0).unwrap();
        assert_eq!(tile.coverage(0), Coverage::Partial);
        assert_eq!(tile.get(0, -1, 0), None);
        assert_eq!(tile.get(0, 1, 1), Some(101.0));

        let tile = image.tile(PixelRect::new(10, 10, 2, 2), 0).unwrap();
        assert_eq!(tile.coverage(0), Coverage::Empty);
    }

    #[test]
    fn test_reduced_level_decimates() {
        let mut image = ramp(8, 8);
        let tile = image.tile(PixelRect::new(0, 0, 4, 4), 1).unwrap();
        assert_eq!(tile.get(0, 1, 1), Some(202.0));
        assert_eq!(tile.get(0, 3, 2), Some(406.0));
    }

    #[test]
    fn test_empty_request_rejected() {
        let mut image = ramp(4, 4);
        assert!(matches!(
            image.tile(PixelRect::new(0, 0, 0, 4), 0),
            Err(RasterError::EmptyRect(_))
        ));
    }

    #[test]
    fn test_catalog_open() {
        let mut catalog = MemoryCatalog::new();
        catalog.insert("master.tif", ramp(4, 4).with_null_value(0.0));

        let source = catalog.open(Path::new("master.tif")).unwrap();
        assert_eq!(source.bounds(), PixelRect::new(0, 0, 4, 4));
        assert_eq!(source.null_value(0), 0.0);
        assert!(matches!(
            catalog.open(Path::new("missing.tif")),
            Err(RasterError::NotFound(_))
        ));
    }
}
