use glam::DVec2;
use nalgebra::{Matrix2, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::tie_set::TiePoint;

/// Aggregate statistics of tie-point displacements, in working pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplacementStats {
    pub count: usize,
    pub mean: DVec2,
    /// Second central moments `[[xx, xy], [xy, yy]]`.
    pub covariance: [[f64; 2]; 2],
    /// RMS spread along the major axis of the covariance ellipse.
    pub major_rms: f64,
    pub minor_rms: f64,
    /// Major axis direction, degrees counter-clockwise from +x in (-90, 90].
    pub orientation_deg: f64,
}

impl DisplacementStats {
    /// `None` for an empty set.
    pub fn compute(ties: &[TiePoint]) -> Option<Self> {
        if ties.is_empty() {
            return None;
        }
        let n = ties.len() as f64;
        let mean = ties.iter().map(|t| t.displacement).sum::<DVec2>() / n;

        let (mut xx, mut xy, mut yy) = (0.0, 0.0, 0.0);
        for tie in ties {
            let d = tie.displacement - mean;
            xx += d.x * d.x;
            xy += d.x * d.y;
            yy += d.y * d.y;
        }
        let (xx, xy, yy) = (xx / n, xy / n, yy / n);

        let eigen = SymmetricEigen::new(Matrix2::new(xx, xy, xy, yy));
        let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
            (0, 1)
        } else {
            (1, 0)
        };
        let axis = eigen.eigenvectors.column(major);
        let mut orientation = axis[1].atan2(axis[0]).to_degrees();
        if orientation <= -90.0 {
            orientation += 180.0;
        } else if orientation > 90.0 {
            orientation -= 180.0;
        }

        Some(Self {
            count: ties.len(),
            mean,
            covariance: [[xx, xy], [xy, yy]],
            major_rms: eigen.eigenvalues[major].max(0.0).sqrt(),
            minor_rms: eigen.eigenvalues[minor].max(0.0).sqrt(),
            orientation_deg: orientation,
        })
    }
}

impl std::fmt::Display for DisplacementStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ties, mean ({:.3}, {:.3}), RMS major {:.3} minor {:.3} at {:.1} deg",
            self.count, self.mean.x, self.mean.y, self.major_rms, self.minor_rms, self.orientation_deg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tie(dx: f64, dy: f64) -> TiePoint {
        TiePoint::new(DVec2::ZERO, DVec2::new(dx, dy), 1.0)
    }

    #[test]
    fn test_empty() {
        assert!(DisplacementStats::compute(&[]).is_none());
    }

    #[test]
    fn test_constant_displacement() {
        let stats = DisplacementStats::compute(&[tie(1.5, -2.0); 4]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, DVec2::new(1.5, -2.0));
        assert_eq!(stats.major_rms, 0.0);
        assert_eq!(stats.minor_rms, 0.0);
    }

    #[test]
    fn test_spread_along_diagonal() {
        // +-1 along (1, 1), +-0.5 along (1, -1)
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let ties = [
            tie(s, s),
            tie(-s, -s),
            tie(0.5 * s, -0.5 * s),
            tie(-0.5 * s, 0.5 * s),
        ];
        let stats = DisplacementStats::compute(&ties).unwrap();

        assert!(stats.mean.length() < 1e-12);
        // Eigenvalues 2/4 and 0.5/4.
        assert!((stats.major_rms - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((stats.minor_rms - 0.125f64.sqrt()).abs() < 1e-12);
        assert!((stats.orientation_deg - 45.0).abs() < 1e-9);
        assert!((stats.covariance[0][1] - stats.covariance[1][0]).abs() < 1e-15);
    }

    #[test]
    fn test_orientation_range() {
        let ties = [tie(0.0, 3.0), tie(0.0, -3.0), tie(0.1, 0.0), tie(-0.1, 0.0)];
        let stats = DisplacementStats::compute(&ties).unwrap();
        assert!((stats.orientation_deg.abs() - 90.0).abs() < 1e-9);
        assert!(stats.orientation_deg > -90.0 && stats.orientation_deg <= 90.0);
    }
}
