//! RANSAC outlier rejection for ground-control tie points.
//!
//! Minimal random samples are fitted until one explains at least the
//! configured fraction of the whole set. That first acceptable fit is
//! refined on its inliers and the set is reduced to them; there is no
//! search for a better consensus afterwards.


use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::config::{ConfigError, Parameters, RansacConfig};
use crate::model::{pixel_residual, ModelSnapshot, OptimizableModel};
use crate::tie_set::TieGptSet;

/// Upper bound on the analytic iteration cap for vanishing success odds.
const MAX_ITERATION_CAP: usize = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum RansacError {
    #[error("Invalid outlier rejection parameters")]
    Config(#[from] ConfigError),
    #[error("{available} tie points cannot determine a model needing {required}")]
    NotEnoughPoints { available: usize, required: usize },
    #[error("No acceptable fit found in {iterations} iterations")]
    Exhausted { iterations: usize },
    #[error("Refit on {inliers} inliers failed")]
    Refit { inliers: usize },
}

/// Result of a successful rejection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacOutcome {
    /// Tie points kept.
    pub inliers: usize,
    /// Points removed from the set.
    pub outliers: usize,
    /// Residual variance of the final fit, in slave pixels squared.
    pub variance: f64,
    /// Iteration that produced the accepted sample, counting from 1.
    pub iterations: usize,
    pub iteration_cap: usize,
}

/// Points per minimal sample: two equations per point.
pub fn minimal_sample_size(degrees_of_freedom: usize) -> usize {
    degrees_of_freedom.div_ceil(2).max(1)
}

/// Mean and standard deviation of the number of draws until a sample of
/// `sample_size` points is all inliers.
pub fn expected_iterations(inlier_ratio: f64, sample_size: usize) -> (f64, f64) {
    let w = inlier_ratio.powi(sample_size as i32);
    if w >= 1.0 {
        return (1.0, 0.0);
    }
    // Geometric distribution with success probability w.
    (1.0 / w, (1.0 - w).sqrt() / w)
}

/// Iterations needed to draw an all-inlier sample with `success_probability`,
/// padded by `z_score` standard deviations.
pub fn iteration_cap(
    inlier_ratio: f64,
    sample_size: usize,
    success_probability: f64,
    z_score: f64,
) -> usize {
    let w = inlier_ratio.powi(sample_size as i32);
    if w >= 1.0 {
        return 1;
    }
    let average = (1.0 - success_probability).ln() / (1.0 - w).ln();
    let (_, std) = expected_iterations(inlier_ratio, sample_size);
    let cap = (average + z_score * std).ceil();
    if !cap.is_finite() || cap >= MAX_ITERATION_CAP as f64 {
        return MAX_ITERATION_CAP;
    }
    (cap as usize).max(1)
}

pub struct OutlierRejector {
    config: RansacConfig,
}

impl OutlierRejector {
    pub fn new(config: RansacConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Fits `model` robustly and reduces `set` to the accepted inliers.
    ///
    /// On error both the set and the model are left as they were. The model
    /// is also returned to its starting parameters after every rejected
    /// trial, so each minimal fit starts from the same state.
    pub fn reject<M: OptimizableModel + ?Sized>(
        &self,
        set: &mut TieGptSet,
        model: &mut M,
        target_variance: Option<f64>,
    ) -> Result<RansacOutcome, RansacError> {
        let total = set.len();
        let sample_size = minimal_sample_size(model.degrees_of_freedom());
        if total < sample_size {
            return Err(RansacError::NotEnoughPoints {
                available: total,
                required: sample_size,
            });
        }

        let cap = iteration_cap(
            self.config.inlier_ratio,
            sample_size,
            self.config.success_probability,
            self.config.z_score,
        );
        let required = ((total as f64 * self.config.inlier_ratio).ceil() as usize).min(total);
        let max_variance = self.config.image_accuracy * self.config.image_accuracy;
        tracing::info!(
            "RANSAC: {} points, model {}, sample size {}, iteration cap {}, need {} inliers",
            total,
            model.kind(),
            sample_size,
            cap,
            required
        );

        let mut rng: ChaCha8Rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let mut indices: Vec<usize> = (0..total).collect();
        let mut sample = Vec::with_capacity(sample_size);
        let mut inliers = Vec::with_capacity(total);

        let initial = model.snapshot();
        for iteration in 1..=cap {
            partial_shuffle(&mut rng, &mut indices, sample_size);
            sample.clear();
            sample.extend(indices[..sample_size].iter().map(|&i| set.ties[i]));

            let fitted = model
                .optimize_fit(&sample, None)
                .filter(|&variance| variance <= max_variance);
            if fitted.is_some() {
                let fit: &M = model;
                inliers.clear();
                inliers.extend(
                    set.ties
                        .iter()
                        .enumerate()
                        .filter(|(_, tie)| pixel_residual(fit, tie) <= self.config.image_accuracy)
                        .map(|(i, _)| i),
                );

                if inliers.len() >= required {
                    let accepted =
                        self.accept(set, model, &inliers, target_variance, iteration, cap);
                    if accepted.is_err() {
                        restore(model, initial.as_ref());
                    }
                    return accepted;
                }
            }

            restore(model, initial.as_ref());
        }

        tracing::warn!("RANSAC exhausted {} iterations without an acceptable fit", cap);
        Err(RansacError::Exhausted { iterations: cap })
    }

    fn accept<M: OptimizableModel + ?Sized>(
        &self,
        set: &mut TieGptSet,
        model: &mut M,
        inliers: &[usize],
        target_variance: Option<f64>,
        iteration: usize,
        cap: usize,
    ) -> Result<RansacOutcome, RansacError> {
        let kept: Vec<_> = inliers.iter().map(|&i| set.ties[i]).collect();
        let variance = model
            .optimize_fit(&kept, target_variance)
            .ok_or(RansacError::Refit {
                inliers: kept.len(),
            })?;

        let outliers = set.len() - inliers.len();
        set.retain_indices(inliers);
        tracing::info!(
            "RANSAC accepted iteration {}/{}: {} inliers, {} outliers, variance {:.4} px^2",
            iteration,
            cap,
            inliers.len(),
            outliers,
            variance
        );

        Ok(RansacOutcome {
            inliers: inliers.len(),
            outliers,
            variance,
            iterations: iteration,
            iteration_cap: cap,
        })
    }
}

fn restore<M: OptimizableModel + ?Sized>(model: &mut M, snapshot: Option<&ModelSnapshot>) {
    if let Some(snapshot) = snapshot {
        model.restore(snapshot);
    }
}

/// Moves `k` uniformly chosen elements to the front of `indices`.
fn partial_shuffle<R: Rng>(rng: &mut R, indices: &mut [usize], k: usize) {
    let n = indices.len();
    debug_assert!(k <= n, "Cannot sample {} indices from {}", k, n);
    for i in 0..k {
        let j = rng.random_range(i..n);
        indices.swap(i, j);
    }
}
