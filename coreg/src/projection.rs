//! Affine map projection between pixel and ground coordinates.
//!
//! Pixel coordinates refer to pixel centres: pixel (0, 0) covers
//! `[-0.5, 0.5) x [-0.5, 0.5)`. Ground coordinates are planar map units
//! (metres for projected systems).

use glam::{DMat2, DVec2};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("World file needs 6 numeric lines, found {0}")]
    WorldFileLength(usize),
    #[error("Invalid number in world file: {0:?}")]
    WorldFileNumber(String),
    #[error("Pixel to ground transform is singular")]
    Singular,
}

/// `ground = origin + col_step * x + row_step * y`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// Ground position of the centre of pixel (0, 0).
    pub origin: DVec2,
    /// Ground offset of one column step.
    pub col_step: DVec2,
    /// Ground offset of one row step.
    pub row_step: DVec2,
}

impl GeoTransform {
    pub fn new(origin: DVec2, col_step: DVec2, row_step: DVec2) -> Result<Self, ProjectionError> {
        let transform = Self {
            origin,
            col_step,
            row_step,
        };
        if !transform.is_invertible() {
            return Err(ProjectionError::Singular);
        }
        Ok(transform)
    }

    /// North-up grid with square pixels of `gsd` ground units.
    pub fn north_up(origin: DVec2, gsd: f64) -> Self {
        Self {
            origin,
            col_step: DVec2::new(gsd, 0.0),
            row_step: DVec2::new(0.0, -gsd),
        }
    }

    #[inline]
    fn linear(&self) -> DMat2 {
        DMat2::from_cols(self.col_step, self.row_step)
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.linear().determinant();
        det.is_finite() && det.abs() > 1e-12 && self.origin.is_finite()
    }

    #[inline]
    pub fn pixel_to_world(&self, pixel: DVec2) -> DVec2 {
        self.origin + self.linear() * pixel
    }

    #[inline]
    pub fn world_to_pixel(&self, world: DVec2) -> DVec2 {
        self.linear().inverse() * (world - self.origin)
    }

    /// Ground size of one pixel along columns and rows.
    pub fn meters_per_pixel(&self) -> DVec2 {
        DVec2::new(self.col_step.length(), self.row_step.length())
    }

    pub fn mean_meters_per_pixel(&self) -> f64 {
        let mpp = self.meters_per_pixel();
        0.5 * (mpp.x + mpp.y)
    }

    /// Same ground footprint sampled `ratio` times more densely.
    ///
    /// The outer corner of pixel (0, 0) stays fixed, so `ratio = 0.5` halves
    /// the pixel count along each axis.
    pub fn rescaled(&self, ratio: f64) -> Self {
        let corner = self.origin - 0.5 * (self.col_step + self.row_step);
        let col_step = self.col_step / ratio;
        let row_step = self.row_step / ratio;
        Self {
            origin: corner + 0.5 * (col_step + row_step),
            col_step,
            row_step,
        }
    }

    /// Parses an ESRI world file (`A D B E C F`, one value per line).
    pub fn from_world_file(text: &str) -> Result<Self, ProjectionError> {
        let values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<f64>()
                    .map_err(|_| ProjectionError::WorldFileNumber(line.to_string()))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        if values.len() != 6 {
            return Err(ProjectionError::WorldFileLength(values.len()));
        }
        Self::new(
            DVec2::new(values[4], values[5]),
            DVec2::new(values[0], values[1]),
            DVec2::new(values[2], values[3]),
        )
    }

    pub fn to_world_file(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            self.col_step.x,
            self.col_step.y,
            self.row_step.x,
            self.row_step.y,
            self.origin.x,
            self.origin.y
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: DVec2, b: DVec2) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn test_pixel_world_round_trip_rotated() {
        let geo = GeoTransform::new(
            DVec2::new(500_000.0, 4_200_000.0),
            DVec2::new(0.9, 0.2),
            DVec2::new(0.25, -1.1),
        )
        .unwrap();
        let pixel = DVec2::new(123.5, -7.25);
        let world = geo.pixel_to_world(pixel);
        assert!(approx(geo.world_to_pixel(world), pixel));
    }

    #[test]
    fn test_singular_transform_rejected() {
        let result = GeoTransform::new(DVec2::ZERO, DVec2::new(1.0, 1.0), DVec2::new(2.0, 2.0));
        assert!(matches!(result, Err(ProjectionError::Singular)));
    }

    #[test]
    fn test_rescaled_keeps_outer_corner() {
        let geo = GeoTransform::north_up(DVec2::new(100.0, 200.0), 2.0);
        let half = geo.rescaled(0.5);

        assert_eq!(half.meters_per_pixel(), DVec2::new(4.0, 4.0));
        let corner = geo.pixel_to_world(DVec2::new(-0.5, -0.5));
        assert!(approx(half.pixel_to_world(DVec2::new(-0.5, -0.5)), corner));
        assert!(approx(half.pixel_to_world(DVec2::new(0.0, 0.0)), DVec2::new(101.0, 199.0)));
    }

    #[test]
    fn test_world_file_round_trip() {
        let text = "2.5\n0.0\n0.0\n-2.5\n440720.0\n3751320.0\n";
        let geo = GeoTransform::from_world_file(text).unwrap();
        assert_eq!(geo.origin, DVec2::new(440720.0, 3751320.0));
        assert_eq!(geo.col_step, DVec2::new(2.5, 0.0));
        assert_eq!(geo.row_step, DVec2::new(0.0, -2.5));
        assert_eq!(geo.mean_meters_per_pixel(), 2.5);

        let again = GeoTransform::from_world_file(&geo.to_world_file()).unwrap();
        assert_eq!(again, geo);
    }

    #[test]
    fn test_world_file_errors() {
        assert!(matches!(
            GeoTransform::from_world_file("1\n0\n0\n-1\n"),
            Err(ProjectionError::WorldFileLength(4))
        ));
        assert!(matches!(
            GeoTransform::from_world_file("1\n0\nx\n-1\n0\n0\n"),
            Err(ProjectionError::WorldFileNumber(_))
        ));
    }
}
