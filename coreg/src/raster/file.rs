//! Raster files decoded with the `image` crate, geo-referenced by an ESRI
//! world-file sidecar (`.wld`, or the three-letter `.pgw`/`.tfw`/`.jgw` form).

use std::path::{Path, PathBuf};

use common::Buffer2;
use image::DynamicImage;

use super::{ImageSource, MemoryImage, RasterError, RasterOpener, ScalarType, DEFAULT_TILE_SIZE};
use crate::projection::GeoTransform;

#[derive(Debug, Clone)]
pub struct ImageFileOpener {
    tile_size: usize,
}

impl Default for ImageFileOpener {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

impl ImageFileOpener {
    pub fn new(tile_size: usize) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        Self { tile_size }
    }

    /// Decodes `path` into memory and attaches its world file when present.
    pub fn load(&self, path: &Path) -> Result<MemoryImage, RasterError> {
        if !path.exists() {
            return Err(RasterError::NotFound(path.to_path_buf()));
        }
        let decoded = image::open(path)?;
        let (scalar_type, bands) = split_bands(decoded);
        let null = match scalar_type {
            ScalarType::F32 | ScalarType::F64 => f64::NAN,
            ScalarType::U8 | ScalarType::U16 => 0.0,
        };

        let mut image = MemoryImage::new(bands)
            .with_scalar_type(scalar_type)
            .with_null_value(null)
            .with_tile_size(self.tile_size, self.tile_size);

        match find_world_file(path) {
            Some(world_path) => {
                let text = std::fs::read_to_string(&world_path)?;
                image = image.with_projection(GeoTransform::from_world_file(&text)?);
                tracing::debug!("Geo-referenced {} from {}", path.display(), world_path.display());
            }
            None => tracing::debug!("No world file next to {}", path.display()),
        }
        Ok(image)
    }
}

impl RasterOpener for ImageFileOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageSource>, RasterError> {
        Ok(Box::new(self.load(path)?))
    }
}

/// Candidate sidecar paths, most specific first.
fn world_file_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let mut chars = ext.chars();
        if let (Some(first), Some(last)) = (chars.next(), chars.last()) {
            candidates.push(path.with_extension(format!("{first}{last}w")));
        }
        candidates.push(path.with_extension(format!("{ext}w")));
    }
    candidates.push(path.with_extension("wld"));
    candidates
}

fn find_world_file(path: &Path) -> Option<PathBuf> {
    world_file_candidates(path)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn deinterleave<T: Copy + Into<f64>>(
    raw: &[T],
    width: usize,
    height: usize,
    channels: usize,
) -> Vec<Buffer2<f64>> {
    (0..channels)
        .map(|c| Buffer2::from_fn(width, height, |x, y| raw[(y * width + x) * channels + c].into()))
        .collect()
}

fn split_bands(decoded: DynamicImage) -> (ScalarType, Vec<Buffer2<f64>>) {
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    match decoded {
        DynamicImage::ImageLuma8(img) => (ScalarType::U8, deinterleave(img.as_raw(), width, height, 1)),
        DynamicImage::ImageLumaA8(img) => (ScalarType::U8, deinterleave(img.as_raw(), width, height, 2)),
        DynamicImage::ImageRgb8(img) => (ScalarType::U8, deinterleave(img.as_raw(), width, height, 3)),
        DynamicImage::ImageRgba8(img) => (ScalarType::U8, deinterleave(img.as_raw(), width, height, 4)),
        DynamicImage::ImageLuma16(img) => (ScalarType::U16, deinterleave(img.as_raw(), width, height, 1)),
        DynamicImage::ImageLumaA16(img) => (ScalarType::U16, deinterleave(img.as_raw(), width, height, 2)),
        DynamicImage::ImageRgb16(img) => (ScalarType::U16, deinterleave(img.as_raw(), width, height, 3)),
        DynamicImage::ImageRgba16(img) => (ScalarType::U16, deinterleave(img.as_raw(), width, height, 4)),
        DynamicImage::ImageRgb32F(img) => (ScalarType::F32, deinterleave(img.as_raw(), width, height, 3)),
        other => {
            let img = other.to_rgba32f();
            (ScalarType::F32, deinterleave(img.as_raw(), width, height, 4))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelRect;
    use glam::DVec2;

    #[test]
    fn test_world_file_candidates() {
        let names: Vec<PathBuf> = world_file_candidates(Path::new("/data/scene.png"));
        assert_eq!(
            names,
            vec![
                PathBuf::from("/data/scene.pgw"),
                PathBuf::from("/data/scene.pngw"),
                PathBuf::from("/data/scene.wld"),
            ]
        );
    }

    #[test]
    fn test_load_png_with_world_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.png");

        let img = image::GrayImage::from_fn(6, 4, |x, y| image::Luma([(10 * x + y) as u8]));
        img.save(&path).unwrap();
        let geo = GeoTransform::north_up(DVec2::new(1000.0, 2000.0), 0.5);
        std::fs::write(dir.path().join("scene.pgw"), geo.to_world_file()).unwrap();

        let mut image = ImageFileOpener::default().load(&path).unwrap();
        assert_eq!(image.bounds(), PixelRect::new(0, 0, 6, 4));
        assert_eq!(image.scalar_type(), ScalarType::U8);
        assert_eq!(image.projection(), Some(geo));

        let tile = image.tile(PixelRect::new(0, 0, 6, 4), 0).unwrap();
        assert_eq!(tile.get(0, 5, 3), Some(53.0));
        // Zero is the no-data value for integer rasters.
        assert_eq!(tile.get(0, 0, 0), None);
    }

    #[test]
    fn test_missing_file() {
        let result = ImageFileOpener::default().open(Path::new("/nonexistent/a.png"));
        assert!(matches!(result, Err(RasterError::NotFound(_))));
    }
}
