//! Bilinear resampling into a target map geometry.

use glam::DVec2;

use super::{ImageSource, PixelRect, RasterError, RasterTile, ScalarType};
use crate::projection::{GeoTransform, ProjectionError};

/// Fractions closer than this to a whole pixel are treated as exact.
const SNAP_EPSILON: f64 = 1e-9;
/// Footprint edges within this distance of a pixel centre round inward.
const BOUNDS_EPSILON: f64 = 1e-6;

/// Presents its input in the pixel grid of `target`.
///
/// Output pixels whose bilinear footprint touches no-data are no-data.
pub struct Resampler<S> {
    source: S,
    target: GeoTransform,
    // Output pixel -> input pixel, composed once: s = origin + dx * x + dy * y.
    origin: DVec2,
    dx: DVec2,
    dy: DVec2,
    bounds: PixelRect,
}

impl<S: ImageSource> Resampler<S> {
    pub fn new(source: S, target: GeoTransform) -> Result<Self, RasterError> {
        let source_geom = source.projection().ok_or(RasterError::NoProjection)?;
        if !source_geom.is_invertible() || !target.is_invertible() {
            return Err(ProjectionError::Singular.into());
        }

        let to_source = |p: DVec2| source_geom.world_to_pixel(target.pixel_to_world(p));
        let origin = to_source(DVec2::ZERO);
        let dx = to_source(DVec2::X) - origin;
        let dy = to_source(DVec2::Y) - origin;

        let to_target = |p: DVec2| target.world_to_pixel(source_geom.pixel_to_world(p));
        let src = source.bounds();
        let corners = [
            DVec2::new(src.x0 as f64 - 0.5, src.y0 as f64 - 0.5),
            DVec2::new(src.x1() as f64 - 0.5, src.y0 as f64 - 0.5),
            DVec2::new(src.x0 as f64 - 0.5, src.y1() as f64 - 0.5),
            DVec2::new(src.x1() as f64 - 0.5, src.y1() as f64 - 0.5),
        ]
        .map(to_target);
        let min = corners.iter().fold(DVec2::INFINITY, |acc, c| acc.min(*c));
        let max = corners.iter().fold(DVec2::NEG_INFINITY, |acc, c| acc.max(*c));
        let bounds = PixelRect::from_corners(
            (
                (min.x + 0.5 + BOUNDS_EPSILON).floor() as i64,
                (min.y + 0.5 + BOUNDS_EPSILON).floor() as i64,
            ),
            (
                (max.x - 0.5 - BOUNDS_EPSILON).ceil() as i64,
                (max.y - 0.5 - BOUNDS_EPSILON).ceil() as i64,
            ),
        );

        Ok(Self {
            source,
            target,
            origin,
            dx,
            dy,
            bounds,
        })
    }

    #[inline]
    fn source_position(&self, x: i64, y: i64) -> DVec2 {
        self.origin + self.dx * x as f64 + self.dy * y as f64
    }

    fn source_rect_for(&self, rect: PixelRect) -> PixelRect {
        let corners = [
            self.source_position(rect.x0, rect.y0),
            self.source_position(rect.x1() - 1, rect.y0),
            self.source_position(rect.x0, rect.y1() - 1),
            self.source_position(rect.x1() - 1, rect.y1() - 1),
        ];
        let min = corners.iter().fold(DVec2::INFINITY, |acc, c| acc.min(*c));
        let max = corners.iter().fold(DVec2::NEG_INFINITY, |acc, c| acc.max(*c));
        PixelRect::from_corners(
            (min.x.floor() as i64 - 1, min.y.floor() as i64 - 1),
            (max.x.ceil() as i64 + 1, max.y.ceil() as i64 + 1),
        )
    }
}

/// Splits a coordinate into a base pixel and a fraction, snapping near-integers.
#[inline]
fn split(v: f64) -> (i64, f64) {
    let base = v.floor();
    let frac = v - base;
    if frac < SNAP_EPSILON {
        (base as i64, 0.0)
    } else if frac > 1.0 - SNAP_EPSILON {
        (base as i64 + 1, 0.0)
    } else {
        (base as i64, frac)
    }
}

fn bilinear(tile: &RasterTile, band: usize, pos: DVec2) -> Option<f64> {
    let (x0, fx) = split(pos.x);
    let (y0, fy) = split(pos.y);

    let mut sum = 0.0;
    for (oy, wy) in [(0, 1.0 - fy), (1, fy)] {
        if wy == 0.0 {
            continue;
        }
        for (ox, wx) in [(0, 1.0 - fx), (1, fx)] {
            if wx == 0.0 {
                continue;
            }
            sum += wx * wy * tile.get(band, x0 + ox, y0 + oy)?;
        }
    }
    Some(sum)
}

impl<S: ImageSource> ImageSource for Resampler<S> {
    fn bounds(&self) -> PixelRect {
        self.bounds
    }

    fn band_count(&self) -> usize {
        self.source.band_count()
    }

    fn scalar_type(&self) -> ScalarType {
        ScalarType::F64
    }

    fn null_value(&self, band: usize) -> f64 {
        self.source.null_value(band)
    }

    fn tile_size(&self) -> (usize, usize) {
        self.source.tile_size()
    }

    fn projection(&self) -> Option<GeoTransform> {
        Some(self.target)
    }

    fn tile(&mut self, rect: PixelRect, level: usize) -> Result<RasterTile, RasterError> {
        super::check_request(rect, level, 0)?;

        let mut out = RasterTile::new_null(rect, ScalarType::F64, self.source.null_values());
        let source_rect = self.source_rect_for(rect);
        if source_rect.intersect(&self.source.bounds()).is_none() {
            return Ok(out);
        }
        let input = self.source.tile(source_rect, 0)?;

        for band in 0..out.band_count() {
            for y in rect.y0..rect.y1() {
                for x in rect.x0..rect.x1() {
                    if let Some(value) = bilinear(&input, band, self.source_position(x, y)) {
                        out.set(band, x, y, value);
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Coverage, MemoryImage};
    use common::Buffer2;

    fn plane_image(geo: GeoTransform) -> MemoryImage {
        MemoryImage::single_band(Buffer2::from_fn(32, 32, |x, y| 2.0 * x as f64 + 3.0 * y as f64))
            .with_projection(geo)
    }

    #[test]
    fn test_identity_geometry_reproduces_samples() {
        let geo = GeoTransform::north_up(DVec2::new(500_000.0, 4_000_000.0), 1.0);
        let mut resampler = Resampler::new(plane_image(geo), geo).unwrap();
        assert_eq!(resampler.bounds(), PixelRect::new(0, 0, 32, 32));

        let tile = resampler.tile(PixelRect::new(0, 0, 32, 32), 0).unwrap();
        assert_eq!(tile.coverage(0), Coverage::Full);
        assert_eq!(tile.get(0, 5, 7), Some(31.0));
        assert_eq!(tile.get(0, 31, 31), Some(155.0));
    }

    #[test]
    fn test_half_pixel_shift_interpolates_linearly() {
        let geo = GeoTransform::north_up(DVec2::new(0.0, 100.0), 1.0);
        let target = GeoTransform::north_up(DVec2::new(0.5, 99.5), 1.0);
        let mut resampler = Resampler::new(plane_image(geo), target).unwrap();

        let tile = resampler.tile(PixelRect::new(0, 0, 8, 8), 0).unwrap();
        let value = tile.get(0, 2, 3).unwrap();
        assert!((value - (2.0 * 2.5 + 3.0 * 3.5)).abs() < 1e-9);
    }

    #[test]
    fn test_outside_source_is_null() {
        let geo = GeoTransform::north_up(DVec2::new(0.0, 100.0), 1.0);
        let mut resampler = Resampler::new(plane_image(geo), geo).unwrap();
        let tile = resampler.tile(PixelRect::new(28, 28, 8, 8), 0).unwrap();
        assert_eq!(tile.coverage(0), Coverage::Partial);
        assert_eq!(tile.get(0, 32, 30), None);
        assert_eq!(tile.get(0, 31, 30), Some(152.0));
    }

    #[test]
    fn test_downsampled_bounds() {
        let geo = GeoTransform::north_up(DVec2::new(0.0, 100.0), 1.0);
        let resampler = Resampler::new(plane_image(geo), geo.rescaled(0.5)).unwrap();
        assert_eq!(resampler.bounds(), PixelRect::new(0, 0, 16, 16));
    }

    #[test]
    fn test_source_without_projection_rejected() {
        let image = MemoryImage::single_band(Buffer2::new_filled(4, 4, 1.0));
        let geo = GeoTransform::north_up(DVec2::ZERO, 1.0);
        assert!(matches!(
            Resampler::new(image, geo),
            Err(RasterError::NoProjection)
        ));
    }
}
