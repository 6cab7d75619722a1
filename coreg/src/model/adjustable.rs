use glam::DVec2;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::plane::{solve_least_squares, PlaneTransform};
use super::{residual_variance, ModelKind, ModelSnapshot, OptimizableModel};
use crate::keywords::{KeywordError, Keywordlist};
use crate::projection::GeoTransform;
use crate::tie_set::TieGpt;

const MAX_ITERATIONS: usize = 8;
const CONVERGED_STEP: f64 = 1e-10;

/// Slave geometry refined by an affine adjustment of its pixel coordinates.
///
/// `inverse(p) = base.pixel_to_world(A(p))` with
/// `A(p) = (a px + b py + tx, c px + d py + ty)`. Fits are Gauss-Newton
/// updates of the current adjustment measured on the ground, so each fit
/// continues from the state left by the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustableProjectionModel {
    kind: ModelKind,
    base: GeoTransform,
    /// `[a, b, tx, c, d, ty]`
    adjustment: [f64; 6],
    #[serde(skip)]
    last_iterations: usize,
}

impl AdjustableProjectionModel {
    pub fn new(kind: ModelKind, base: GeoTransform) -> Self {
        assert!(kind.is_adjustable(), "{kind} is not an adjustable projection");
        Self {
            kind,
            base,
            adjustment: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            last_iterations: 0,
        }
    }

    pub fn adjustment(&self) -> PlaneTransform {
        PlaneTransform::affine(self.adjustment)
    }

    /// Gauss-Newton iterations used by the last fit.
    pub fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    fn free_parameters(&self) -> &'static [usize] {
        match self.kind {
            ModelKind::ProjectionShift => &[2, 5],
            _ => &[0, 1, 2, 3, 4, 5],
        }
    }

    fn ground_residuals(&self, ties: &[TieGpt]) -> (DVector<f64>, f64) {
        let mut r = DVector::zeros(2 * ties.len());
        for (i, tie) in ties.iter().enumerate() {
            let d = self.inverse(tie.slave) - tie.ground.truncate();
            r[2 * i] = d.x;
            r[2 * i + 1] = d.y;
        }
        let sse = r.norm_squared();
        (r, sse)
    }

    fn pixel_variance(&self, sse_ground: f64, points: usize) -> f64 {
        let mpp = self.meters_per_pixel();
        residual_variance(sse_ground / (mpp * mpp), points, self.degrees_of_freedom())
    }
}

impl OptimizableModel for AdjustableProjectionModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn optimize_fit(&mut self, ties: &[TieGpt], target_variance: Option<f64>) -> Option<f64> {
        let free = self.free_parameters();
        if 2 * ties.len() < free.len() {
            return None;
        }
        let start = self.adjustment;
        let (col, row) = (self.base.col_step, self.base.row_step);

        let (mut residuals, mut sse) = self.ground_residuals(ties);
        self.last_iterations = 0;
        while self.last_iterations < MAX_ITERATIONS {
            let variance = self.pixel_variance(sse, ties.len());
            if target_variance.is_some_and(|target| variance <= target) {
                break;
            }

            // d ground / d parameter = L * d A(p) / d parameter
            let mut jacobian = DMatrix::<f64>::zeros(2 * ties.len(), free.len());
            for (i, tie) in ties.iter().enumerate() {
                let p = tie.slave;
                let partials = [p.x, p.y, 1.0];
                for (j, &param) in free.iter().enumerate() {
                    let d_pixel = if param < 3 {
                        DVec2::new(partials[param], 0.0)
                    } else {
                        DVec2::new(0.0, partials[param - 3])
                    };
                    let d_ground = col * d_pixel.x + row * d_pixel.y;
                    jacobian[(2 * i, j)] = d_ground.x;
                    jacobian[(2 * i + 1, j)] = d_ground.y;
                }
            }

            let Some(step) = solve_least_squares(jacobian, &(-&residuals)) else {
                self.adjustment = start;
                return None;
            };
            for (j, &param) in free.iter().enumerate() {
                self.adjustment[param] += step[j];
            }
            self.last_iterations += 1;
            (residuals, sse) = self.ground_residuals(ties);

            let scale = 1.0 + self.adjustment.iter().map(|v| v.abs()).fold(0.0, f64::max);
            if step.amax() <= CONVERGED_STEP * scale {
                break;
            }
        }

        if !sse.is_finite() || !self.adjustment().is_valid() {
            self.adjustment = start;
            return None;
        }
        Some(self.pixel_variance(sse, ties.len()))
    }

    fn forward(&self, ground: DVec2) -> DVec2 {
        let nominal = self.base.world_to_pixel(ground);
        match self.adjustment().inverse() {
            Some(inv) => inv.apply(nominal),
            None => DVec2::NAN,
        }
    }

    fn inverse(&self, pixel: DVec2) -> DVec2 {
        self.base.pixel_to_world(self.adjustment().apply(pixel))
    }

    fn use_forward(&self) -> bool {
        false
    }

    fn meters_per_pixel(&self) -> f64 {
        self.base.mean_meters_per_pixel()
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        Some(ModelSnapshot(self.adjustment.to_vec()))
    }

    fn restore(&mut self, snapshot: &ModelSnapshot) {
        if let Ok(adjustment) = <[f64; 6]>::try_from(snapshot.0.as_slice()) {
            self.adjustment = adjustment;
        }
    }

    fn save_state(&self, kwl: &mut Keywordlist, prefix: &str) -> Result<(), KeywordError> {
        kwl.save_struct(prefix, self)
    }
}
