//! Tie points and the exported ground-control tie-point set.

use std::path::Path;

use common::{FileExtensionError, SerdeFormat, SerdeFormatError};
use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Correspondence found by the chip matcher, in working pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TiePoint {
    pub master: DVec2,
    /// Slave position minus master position.
    pub displacement: DVec2,
    pub score: f64,
}

impl TiePoint {
    pub fn new(master: DVec2, displacement: DVec2, score: f64) -> Self {
        Self {
            master,
            displacement,
            score,
        }
    }

    #[inline]
    pub fn slave(&self) -> DVec2 {
        self.master + self.displacement
    }
}

/// Tie point expressed as master ground position and slave image position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TieGpt {
    pub ground: DVec3,
    pub slave: DVec2,
    pub score: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum TieSetError {
    #[error("Failed to access tie-point file")]
    Io(#[from] std::io::Error),
    #[error("Unsupported tie-point file name")]
    Format(#[from] FileExtensionError),
    #[error("Tie-point document conversion failed")]
    Serde(#[from] SerdeFormatError),
}

/// Ground-control tie points with shared uncertainty.
///
/// Covariances apply to every point: `image_cov` to slave pixel positions
/// and `ground_cov` to ground positions (east, north, height).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieGptSet {
    pub master_path: String,
    pub slave_path: String,
    pub image_cov: [[f64; 2]; 2],
    pub ground_cov: [[f64; 3]; 3],
    pub ties: Vec<TieGpt>,
}

impl TieGptSet {
    pub fn new(master_path: impl Into<String>, slave_path: impl Into<String>) -> Self {
        Self {
            master_path: master_path.into(),
            slave_path: slave_path.into(),
            image_cov: [[0.0; 2]; 2],
            ground_cov: [[0.0; 3]; 3],
            ties: Vec::new(),
        }
    }

    /// Diagonal image covariance with standard deviation `sigma` pixels.
    pub fn set_image_sigma(&mut self, sigma: f64) {
        let var = sigma * sigma;
        self.image_cov = [[var, 0.0], [0.0, var]];
    }

    /// Diagonal ground covariance from horizontal and vertical standard deviations.
    pub fn set_ground_sigma(&mut self, horizontal: f64, vertical: f64) {
        let h = horizontal * horizontal;
        self.ground_cov = [[h, 0.0, 0.0], [0.0, h, 0.0], [0.0, 0.0, vertical * vertical]];
    }

    pub fn len(&self) -> usize {
        self.ties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ties.is_empty()
    }

    /// Keeps only the points at `indices`, in the given order.
    pub fn retain_indices(&mut self, indices: &[usize]) {
        self.ties = indices.iter().map(|&i| self.ties[i]).collect();
    }

    /// Writes the set as JSON or YAML, chosen by file extension.
    pub fn save(&self, path: &Path) -> Result<(), TieSetError> {
        let format = SerdeFormat::from_path(path)?;
        std::fs::write(path, format.serialize(self)?)?;
        tracing::info!("Exported {} tie points to {}", self.ties.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TieSetError> {
        let format = SerdeFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)?;
        Ok(format.deserialize(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn random_set(count: usize) -> TieGptSet {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut set = TieGptSet::new("master.png", "slave.png");
        set.set_image_sigma(0.5);
        set.set_ground_sigma(2.0, 100.0);
        for _ in 0..count {
            set.ties.push(TieGpt {
                ground: DVec3::new(
                    rng.random_range(440_000.0..450_000.0),
                    rng.random_range(3_750_000.0..3_760_000.0),
                    0.0,
                ),
                slave: DVec2::new(rng.random_range(0.0..4000.0), rng.random_range(0.0..4000.0)),
                score: rng.random_range(0.5..1.0),
            });
        }
        set
    }

    #[test]
    fn test_export_reload_json_and_yaml() {
        let set = random_set(25);
        for name in ["tie_set_round_trip.json", "tie_set_round_trip.yaml"] {
            let path = test_output_path(name);
            set.save(&path).unwrap();
            let back = TieGptSet::load(&path).unwrap();

            assert_eq!(back.master_path, set.master_path);
            assert_eq!(back.image_cov, set.image_cov);
            assert_eq!(back.ground_cov, set.ground_cov);
            assert_eq!(back.ties.len(), set.ties.len());
            for (a, b) in back.ties.iter().zip(&set.ties) {
                assert!((a.ground - b.ground).length() < 1e-6);
                assert!((a.slave - b.slave).length() < 1e-9);
                assert!((a.score - b.score).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let set = random_set(1);
        let result = set.save(&test_output_path("tie_set.txt"));
        assert!(matches!(result, Err(TieSetError::Format(_))));
    }

    #[test]
    fn test_covariances_are_diagonal() {
        let set = random_set(0);
        assert_eq!(set.image_cov, [[0.25, 0.0], [0.0, 0.25]]);
        assert_eq!(set.ground_cov[2][2], 10_000.0);
        assert_eq!(set.ground_cov[0][1], 0.0);
    }

    #[test]
    fn test_retain_indices() {
        let mut set = random_set(5);
        let keep = [set.ties[1], set.ties[3]];
        set.retain_indices(&[1, 3]);
        assert_eq!(set.ties, keep);
    }
}
