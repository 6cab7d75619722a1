use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::plane::{
    estimate_affine, estimate_homography, estimate_similarity, estimate_translation,
    PlaneTransform,
};
use super::{residual_variance, ModelKind, ModelSnapshot, OptimizableModel};
use crate::keywords::{KeywordError, Keywordlist};
use crate::projection::GeoTransform;
use crate::tie_set::TieGpt;

/// Planar correction applied to the nominal slave pixel position.
///
/// `forward(g) = correction(base.world_to_pixel(g))`. Fits are closed form
/// and do not depend on the previous correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformModel {
    kind: ModelKind,
    base: GeoTransform,
    correction: PlaneTransform,
}

impl TransformModel {
    pub fn new(kind: ModelKind, base: GeoTransform) -> Self {
        assert!(!kind.is_adjustable(), "{kind} is not a planar transform");
        Self {
            kind,
            base,
            correction: PlaneTransform::identity(),
        }
    }

    pub fn correction(&self) -> &PlaneTransform {
        &self.correction
    }

    pub fn base(&self) -> &GeoTransform {
        &self.base
    }
}

impl OptimizableModel for TransformModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn optimize_fit(&mut self, ties: &[TieGpt], _target_variance: Option<f64>) -> Option<f64> {
        let nominal: Vec<DVec2> = ties
            .iter()
            .map(|t| self.base.world_to_pixel(t.ground.truncate()))
            .collect();
        let actual: Vec<DVec2> = ties.iter().map(|t| t.slave).collect();

        let correction = match self.kind {
            ModelKind::Translation => estimate_translation(&nominal, &actual),
            ModelKind::Similarity => estimate_similarity(&nominal, &actual),
            ModelKind::Affine => estimate_affine(&nominal, &actual),
            ModelKind::Homography => estimate_homography(&nominal, &actual),
            ModelKind::ProjectionShift | ModelKind::ProjectionAffine => None,
        }?;

        let sse: f64 = nominal
            .iter()
            .zip(&actual)
            .map(|(n, a)| (correction.apply(*n) - *a).length_squared())
            .sum();
        if !sse.is_finite() {
            return None;
        }
        self.correction = correction;
        Some(residual_variance(sse, ties.len(), self.degrees_of_freedom()))
    }

    fn forward(&self, ground: DVec2) -> DVec2 {
        self.correction.apply(self.base.world_to_pixel(ground))
    }

    fn inverse(&self, pixel: DVec2) -> DVec2 {
        let nominal = match self.correction.inverse() {
            Some(inv) => inv.apply(pixel),
            None => DVec2::NAN,
        };
        self.base.pixel_to_world(nominal)
    }

    fn meters_per_pixel(&self) -> f64 {
        self.base.mean_meters_per_pixel()
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        Some(ModelSnapshot(self.correction.matrix.to_vec()))
    }

    fn restore(&mut self, snapshot: &ModelSnapshot) {
        if let Ok(matrix) = <[f64; 9]>::try_from(snapshot.0.as_slice()) {
            self.correction = PlaneTransform { matrix };
        }
    }

    fn save_state(&self, kwl: &mut Keywordlist, prefix: &str) -> Result<(), KeywordError> {
        kwl.save_struct(prefix, self)
    }
}
