//! Sub-pixel peak refinement by a least-squares quadratic fit.
//!
//! The 3x3 neighbourhood `v(x, y)`, `x, y in {-1, 0, 1}`, is fitted with
//! `f = a0 + ax x + ay y + axy x y + axx x^2 + ayy y^2`. Each coefficient is
//! a fixed linear combination of the nine samples (rows of the
//! pseudo-inverse of the design matrix), listed row-major from `(-1, -1)`.

use common::Buffer2;
use glam::{DMat2, DVec2};

/// Largest accepted distance of the optimum from the integer peak, per axis.
pub const MAX_OFFSET: f64 = 0.501;

const QUAD_FIT: [[f64; 9]; 6] = [
    // a0
    [
        -1.0 / 9.0,
        2.0 / 9.0,
        -1.0 / 9.0,
        2.0 / 9.0,
        5.0 / 9.0,
        2.0 / 9.0,
        -1.0 / 9.0,
        2.0 / 9.0,
        -1.0 / 9.0,
    ],
    // ax
    [
        -1.0 / 6.0,
        0.0,
        1.0 / 6.0,
        -1.0 / 6.0,
        0.0,
        1.0 / 6.0,
        -1.0 / 6.0,
        0.0,
        1.0 / 6.0,
    ],
    // ay
    [
        -1.0 / 6.0,
        -1.0 / 6.0,
        -1.0 / 6.0,
        0.0,
        0.0,
        0.0,
        1.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
    ],
    // axy
    [0.25, 0.0, -0.25, 0.0, 0.0, 0.0, -0.25, 0.0, 0.25],
    // axx
    [
        1.0 / 6.0,
        -2.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
        -2.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
        -2.0 / 6.0,
        1.0 / 6.0,
    ],
    // ayy
    [
        1.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
        -2.0 / 6.0,
        -2.0 / 6.0,
        -2.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
        1.0 / 6.0,
    ],
];

/// Fitted quadratic surface around a peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadratic {
    pub a0: f64,
    pub ax: f64,
    pub ay: f64,
    pub axy: f64,
    pub axx: f64,
    pub ayy: f64,
}

impl Quadratic {
    pub fn fit(samples: &[f64; 9]) -> Self {
        let c: [f64; 6] =
            std::array::from_fn(|i| QUAD_FIT[i].iter().zip(samples).map(|(w, v)| w * v).sum());
        Self {
            a0: c[0],
            ax: c[1],
            ay: c[2],
            axy: c[3],
            axx: c[4],
            ayy: c[5],
        }
    }

    pub fn hessian(&self) -> DMat2 {
        DMat2::from_cols(
            DVec2::new(2.0 * self.axx, self.axy),
            DVec2::new(self.axy, 2.0 * self.ayy),
        )
    }

    pub fn value(&self, p: DVec2) -> f64 {
        self.a0
            + self.ax * p.x
            + self.ay * p.y
            + self.axy * p.x * p.y
            + self.axx * p.x * p.x
            + self.ayy * p.y * p.y
    }

    /// Stationary point, if the surface is a concave cap.
    pub fn maximum(&self) -> Option<DVec2> {
        let h = self.hessian();
        let det = h.determinant();
        if !(h.x_axis.x + h.y_axis.y < 0.0 && det > 0.0) {
            return None;
        }
        Some(-(h.inverse() * DVec2::new(self.ax, self.ay)))
    }
}

/// Refines the integer peak at (`x`, `y`) of `surface`.
///
/// Returns the offset from the integer peak and the fitted score (at most
/// 1), or `None` when the peak touches the surface border, the fit is not
/// concave, or the optimum lies further than [`MAX_OFFSET`] away.
pub fn refine_peak(surface: &Buffer2<f64>, x: usize, y: usize) -> Option<(DVec2, f64)> {
    if x == 0 || y == 0 || x + 1 >= surface.width() || y + 1 >= surface.height() {
        return None;
    }
    let samples: [f64; 9] = std::array::from_fn(|i| surface[(x + i % 3 - 1, y + i / 3 - 1)]);
    let quad = Quadratic::fit(&samples);
    let offset = quad.maximum()?;
    if offset.x.abs() > MAX_OFFSET || offset.y.abs() > MAX_OFFSET {
        return None;
    }
    Some((offset, quad.value(offset).min(1.0)))
}
