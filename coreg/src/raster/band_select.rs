use super::{ImageSource, PixelRect, RasterError, RasterTile, ScalarType};
use crate::projection::GeoTransform;

/// Exposes a single band of its input.
pub struct BandSelector<S> {
    source: S,
    band: usize,
}

impl<S: ImageSource> BandSelector<S> {
    /// Selects `band`, falling back to band 0 when the input has fewer bands.
    pub fn new(source: S, band: usize) -> Self {
        let band = if band < source.band_count() {
            band
        } else {
            tracing::warn!(
                "Band {} out of range ({} bands available), using band 0",
                band,
                source.band_count()
            );
            0
        };
        Self { source, band }
    }

    pub fn selected_band(&self) -> usize {
        self.band
    }
}

impl<S: ImageSource> ImageSource for BandSelector<S> {
    fn bounds(&self) -> PixelRect {
        self.source.bounds()
    }

    fn band_count(&self) -> usize {
        1
    }

    fn scalar_type(&self) -> ScalarType {
        self.source.scalar_type()
    }

    fn null_value(&self, _band: usize) -> f64 {
        self.source.null_value(self.band)
    }

    fn tile_size(&self) -> (usize, usize) {
        self.source.tile_size()
    }

    fn projection(&self) -> Option<GeoTransform> {
        self.source.projection()
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        let tile = self.source.tile(rect, level)?;
        let null = tile.null_value(self.band);
        let scalar_type = tile.scalar_type();
        let band = tile.into_bands().swap_remove(self.band);
        Ok(RasterTile::from_bands(rect, scalar_type, vec![null], vec![band]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemoryImage;
    use common::Buffer2;

    fn two_band() -> MemoryImage {
        MemoryImage::new(vec![
            Buffer2::new_filled(4, 4, 1.0),
            Buffer2::new_filled(4, 4, 2.0),
        ])
    }

    #[test]
    fn test_selects_requested_band() {
        let mut selector = BandSelector::new(two_band(), 1);
        assert_eq!(selector.band_count(), 1);
        let tile = selector.tile(PixelRect::new(0, 0, 2, 2), 0).unwrap();
        assert_eq!(tile.band_count(), 1);
        assert_eq!(tile.get(0, 1, 1), Some(2.0));
    }

    #[test]
    fn test_out_of_range_falls_back_to_first_band() {
        let mut selector = BandSelector::new(two_band(), 5);
        assert_eq!(selector.selected_band(), 0);
        let tile = selector.tile(PixelRect::new(0, 0, 2, 2), 0).unwrap();
        assert_eq!(tile.get(0, 0, 0), Some(1.0));
    }
}
