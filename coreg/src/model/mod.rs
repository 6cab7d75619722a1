//! Optimizable geometric models relating ground positions to slave pixels.
//!
//! A model maps ground (east, north) to slave pixel coordinates ("forward")
//! and back ("inverse"). Models are fitted to ground-control tie points by
//! least squares; the outlier rejector drives them through
//! [`OptimizableModel`].

mod adjustable;
pub mod plane;
mod transform;

#[cfg(test)]
mod tests;

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::keywords::{KeywordError, Keywordlist};
use crate::projection::GeoTransform;
use crate::tie_set::TieGpt;

pub use adjustable::AdjustableProjectionModel;
pub use plane::PlaneTransform;
pub use transform::TransformModel;

/// Available model families.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelKind {
    /// Pixel shift on top of the slave geometry (2 DOF).
    Translation,
    /// Rotation, scale and shift (4 DOF).
    Similarity,
    /// Full affine pixel correction (6 DOF).
    Affine,
    /// Projective pixel correction (8 DOF).
    Homography,
    /// Slave geometry with an iteratively refined shift (2 DOF).
    ProjectionShift,
    /// Slave geometry with an iteratively refined affine adjustment (6 DOF).
    ProjectionAffine,
}

impl ModelKind {
    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            ModelKind::Translation | ModelKind::ProjectionShift => 2,
            ModelKind::Similarity => 4,
            ModelKind::Affine | ModelKind::ProjectionAffine => 6,
            ModelKind::Homography => 8,
        }
    }

    /// Whether the model carries fit state between calls.
    pub fn is_adjustable(&self) -> bool {
        matches!(self, ModelKind::ProjectionShift | ModelKind::ProjectionAffine)
    }
}

/// Opaque copy of a stateful model's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot(pub(crate) Vec<f64>);

/// A parameterised transform that can be fitted to tie points.
pub trait OptimizableModel {
    fn kind(&self) -> ModelKind;

    fn degrees_of_freedom(&self) -> usize {
        self.kind().degrees_of_freedom()
    }

    /// Least-squares fit to `ties`. Returns the residual variance in slave
    /// pixels squared, or `None` if the points do not determine the model.
    ///
    /// Iterative models stop early once `target_variance` is reached.
    fn optimize_fit(&mut self, ties: &[TieGpt], target_variance: Option<f64>) -> Option<f64>;

    /// Ground to slave pixel.
    fn forward(&self, ground: DVec2) -> DVec2;

    /// Slave pixel to ground.
    fn inverse(&self, pixel: DVec2) -> DVec2;

    /// Whether residuals are best measured in pixel space through
    /// `forward`; otherwise they are measured on the ground through `inverse`.
    fn use_forward(&self) -> bool {
        true
    }

    /// Ground size of a slave pixel, converting inverse residuals to pixels.
    fn meters_per_pixel(&self) -> f64 {
        1.0
    }

    /// State to restore after a rejected trial fit. `None` when there is nothing to restore.
    fn snapshot(&self) -> Option<ModelSnapshot> {
        None
    }

    fn restore(&mut self, _snapshot: &ModelSnapshot) {}

    fn save_state(&self, kwl: &mut Keywordlist, prefix: &str) -> Result<(), KeywordError>;
}

/// Residual of one tie point in slave pixels, in the model's preferred direction.
pub fn pixel_residual<M: OptimizableModel + ?Sized>(model: &M, tie: &TieGpt) -> f64 {
    let ground = tie.ground.truncate();
    if model.use_forward() {
        (model.forward(ground) - tie.slave).length()
    } else {
        (model.inverse(tie.slave) - ground).length() / model.meters_per_pixel()
    }
}

/// Model chosen at run time, dispatched by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum GeometricModel {
    Transform(TransformModel),
    Adjustable(AdjustableProjectionModel),
}

impl GeometricModel {
    /// Identity model of `kind` over the slave image geometry.
    pub fn new(kind: ModelKind, slave_geometry: GeoTransform) -> Self {
        if kind.is_adjustable() {
            GeometricModel::Adjustable(AdjustableProjectionModel::new(kind, slave_geometry))
        } else {
            GeometricModel::Transform(TransformModel::new(kind, slave_geometry))
        }
    }

    pub fn load_state(kwl: &Keywordlist, prefix: &str) -> Result<Self, KeywordError> {
        kwl.load_struct(prefix)
    }

    fn inner(&self) -> &dyn OptimizableModel {
        match self {
            GeometricModel::Transform(m) => m,
            GeometricModel::Adjustable(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn OptimizableModel {
        match self {
            GeometricModel::Transform(m) => m,
            GeometricModel::Adjustable(m) => m,
        }
    }
}

impl OptimizableModel for GeometricModel {
    fn kind(&self) -> ModelKind {
        self.inner().kind()
    }

    fn optimize_fit(&mut self, ties: &[TieGpt], target_variance: Option<f64>) -> Option<f64> {
        self.inner_mut().optimize_fit(ties, target_variance)
    }

    fn forward(&self, ground: DVec2) -> DVec2 {
        self.inner().forward(ground)
    }

    fn inverse(&self, pixel: DVec2) -> DVec2 {
        self.inner().inverse(pixel)
    }

    fn use_forward(&self) -> bool {
        self.inner().use_forward()
    }

    fn meters_per_pixel(&self) -> f64 {
        self.inner().meters_per_pixel()
    }

    fn snapshot(&self) -> Option<ModelSnapshot> {
        self.inner().snapshot()
    }

    fn restore(&mut self, snapshot: &ModelSnapshot) {
        self.inner_mut().restore(snapshot)
    }

    fn save_state(&self, kwl: &mut Keywordlist, prefix: &str) -> Result<(), KeywordError> {
        kwl.save_struct(prefix, self)
    }
}

/// `sse / max(1, 2n - dof)`
pub(crate) fn residual_variance(sse: f64, points: usize, dof: usize) -> f64 {
    let redundancy = (2 * points).saturating_sub(dof).max(1);
    sse / redundancy as f64
}
