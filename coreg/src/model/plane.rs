//! Planar transforms and their least-squares estimation from point pairs.

use glam::DVec2;
use nalgebra::{DMatrix, DVector, Matrix3, SVD};
use serde::{Deserialize, Serialize};

/// Projective transform of the plane as a row-major 3x3 matrix.
///
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// | g  h  1  |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneTransform {
    pub matrix: [f64; 9],
}

impl Default for PlaneTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PlaneTransform {
    pub const fn identity() -> Self {
        Self {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn translation(t: DVec2) -> Self {
        Self {
            matrix: [1.0, 0.0, t.x, 0.0, 1.0, t.y, 0.0, 0.0, 1.0],
        }
    }

    pub fn similarity(t: DVec2, angle: f64, scale: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            matrix: [
                scale * cos,
                -scale * sin,
                t.x,
                scale * sin,
                scale * cos,
                t.y,
                0.0,
                0.0,
                1.0,
            ],
        }
    }

    /// `[a, b, tx, c, d, ty]`
    pub fn affine(p: [f64; 6]) -> Self {
        Self {
            matrix: [p[0], p[1], p[2], p[3], p[4], p[5], 0.0, 0.0, 1.0],
        }
    }

    fn to_nalgebra(self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.matrix)
    }

    fn from_nalgebra(m: &Matrix3<f64>) -> Self {
        Self {
            matrix: std::array::from_fn(|i| m[(i / 3, i % 3)]),
        }
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let m = &self.matrix;
        let w = m[6] * p.x + m[7] * p.y + m[8];
        DVec2::new(
            (m[0] * p.x + m[1] * p.y + m[2]) / w,
            (m[3] * p.x + m[4] * p.y + m[5]) / w,
        )
    }

    /// `self` applied after `first`.
    pub fn compose(&self, first: &PlaneTransform) -> PlaneTransform {
        Self::from_nalgebra(&(self.to_nalgebra() * first.to_nalgebra()))
    }

    pub fn inverse(&self) -> Option<PlaneTransform> {
        let inv = self.to_nalgebra().try_inverse()?;
        let mut result = Self::from_nalgebra(&inv);
        let scale = result.matrix[8];
        if scale.abs() > 1e-12 {
            for v in &mut result.matrix {
                *v /= scale;
            }
        }
        Some(result)
    }

    pub fn is_valid(&self) -> bool {
        let m = &self.matrix;
        let det = m[0] * m[4] - m[1] * m[3];
        m.iter().all(|v| v.is_finite()) && det.abs() > 1e-12
    }
}

pub(crate) fn centroid(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    points.iter().sum::<DVec2>() / points.len() as f64
}

/// Average-distance normalisation: centroid to the origin, mean distance `sqrt(2)`.
pub(crate) fn normalize_points(points: &[DVec2]) -> (Vec<DVec2>, PlaneTransform) {
    let c = centroid(points);
    let avg_dist = points.iter().map(|p| (*p - c).length()).sum::<f64>() / points.len().max(1) as f64;
    if avg_dist < 1e-10 {
        return (points.to_vec(), PlaneTransform::identity());
    }
    let scale = std::f64::consts::SQRT_2 / avg_dist;
    let normalized = points.iter().map(|p| (*p - c) * scale).collect();
    let t = PlaneTransform::affine([scale, 0.0, -c.x * scale, 0.0, scale, -c.y * scale]);
    (normalized, t)
}

pub(crate) fn estimate_translation(from: &[DVec2], to: &[DVec2]) -> Option<PlaneTransform> {
    if from.is_empty() {
        return None;
    }
    let d = from.iter().zip(to).map(|(f, t)| *t - *f).sum::<DVec2>();
    Some(PlaneTransform::translation(d / from.len() as f64))
}

/// Rotation, uniform scale and translation by Procrustes analysis.
pub(crate) fn estimate_similarity(from: &[DVec2], to: &[DVec2]) -> Option<PlaneTransform> {
    if from.len() < 2 {
        return None;
    }
    let fc = centroid(from);
    let tc = centroid(to);

    let (mut sxx, mut sxy, mut syx, mut syy, mut var) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (f, t) in from.iter().zip(to) {
        let r = *f - fc;
        let s = *t - tc;
        sxx += r.x * s.x;
        sxy += r.x * s.y;
        syx += r.y * s.x;
        syy += r.y * s.y;
        var += r.length_squared();
    }
    if var < 1e-10 {
        return None;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin, cos) = angle.sin_cos();
    let scale = ((sxx + syy) * cos + (sxy - syx) * sin) / var;
    if scale <= 0.0 {
        return None;
    }
    let t = DVec2::new(
        tc.x - scale * (cos * fc.x - sin * fc.y),
        tc.y - scale * (sin * fc.x + cos * fc.y),
    );
    Some(PlaneTransform::similarity(t, angle, scale))
}

/// Least-squares affine fit on centred coordinates.
pub(crate) fn estimate_affine(from: &[DVec2], to: &[DVec2]) -> Option<PlaneTransform> {
    if from.len() < 3 {
        return None;
    }
    let fc = centroid(from);
    let tc = centroid(to);

    // With centred inputs the translation decouples from the 2x2 part.
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    let (mut ux, mut vx, mut uy, mut vy) = (0.0, 0.0, 0.0, 0.0);
    for (f, t) in from.iter().zip(to) {
        let r = *f - fc;
        let s = *t - tc;
        sxx += r.x * r.x;
        sxy += r.x * r.y;
        syy += r.y * r.y;
        ux += r.x * s.x;
        vx += r.y * s.x;
        uy += r.x * s.y;
        vy += r.y * s.y;
    }
    let det = sxx * syy - sxy * sxy;
    if det.abs() <= 1e-12 * (sxx * syy).max(1e-300) {
        return None;
    }
    let a = (ux * syy - vx * sxy) / det;
    let b = (vx * sxx - ux * sxy) / det;
    let c = (uy * syy - vy * sxy) / det;
    let d = (vy * sxx - uy * sxy) / det;
    let tx = tc.x - a * fc.x - b * fc.y;
    let ty = tc.y - c * fc.x - d * fc.y;

    let transform = PlaneTransform::affine([a, b, tx, c, d, ty]);
    transform.is_valid().then_some(transform)
}

/// Direct linear transform on normalised points.
pub(crate) fn estimate_homography(from: &[DVec2], to: &[DVec2]) -> Option<PlaneTransform> {
    if from.len() < 4 {
        return None;
    }
    let (from_n, from_t) = normalize_points(from);
    let (to_n, to_t) = normalize_points(to);

    let n = from_n.len();
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (r, t)) in from_n.iter().zip(&to_n).enumerate() {
        let row = [-r.x, -r.y, -1.0, 0.0, 0.0, 0.0, r.x * t.x, r.y * t.x, t.x];
        for (j, v) in row.iter().enumerate() {
            a[(2 * i, j)] = *v;
        }
        let row = [0.0, 0.0, 0.0, -r.x, -r.y, -1.0, r.x * t.y, r.y * t.y, t.y];
        for (j, v) in row.iter().enumerate() {
            a[(2 * i + 1, j)] = *v;
        }
    }

    // Null-space vector: right singular vector of the smallest singular value.
    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));
    let smallest = order[0];
    // A one-dimensional null space is needed for a unique solution.
    let largest = svd.singular_values[order[order.len() - 1]];
    if svd.singular_values[order[1]] <= 1e-10 * largest {
        return None;
    }
    let h = PlaneTransform {
        matrix: std::array::from_fn(|j| v_t[(smallest, j)]),
    };

    let to_inv = to_t.inverse()?;
    let mut result = to_inv.compose(&h).compose(&from_t);
    let scale = result.matrix[8];
    if scale.abs() < 1e-10 {
        return None;
    }
    for v in &mut result.matrix {
        *v /= scale;
    }
    result.is_valid().then_some(result)
}

/// Linear least squares `a x = b` by SVD. `None` when rank deficient.
pub(crate) fn solve_least_squares(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let cols = a.ncols();
    let svd = SVD::new(a, true, true);
    let max_sv = svd.singular_values.max();
    let rank = svd.rank(max_sv * 1e-12);
    if rank < cols {
        return None;
    }
    svd.solve(b, max_sv * 1e-12).ok()
}
