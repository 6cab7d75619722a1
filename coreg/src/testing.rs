//! Synthetic scenes shared by the unit tests.

use common::Buffer2;
use glam::DVec2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::projection::GeoTransform;
use crate::raster::MemoryImage;

#[derive(Debug, Clone, Copy)]
struct Blob {
    center: DVec2,
    sigma: f64,
    amplitude: f64,
}

/// Sum of Gaussian blobs over a constant background, defined everywhere.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    blobs: Vec<Blob>,
    background: f64,
}

impl SyntheticScene {
    pub fn random(seed: u64, width: usize, height: usize, count: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let blobs = (0..count)
            .map(|_| Blob {
                center: DVec2::new(
                    rng.random_range(-8.0..width as f64 + 8.0),
                    rng.random_range(-8.0..height as f64 + 8.0),
                ),
                sigma: rng.random_range(2.0..4.5),
                amplitude: rng.random_range(20.0..80.0) * if rng.random::<bool>() { 1.0 } else { -0.6 },
            })
            .collect();
        Self {
            blobs,
            background: 100.0,
        }
    }

    pub fn value(&self, p: DVec2) -> f64 {
        self.background
            + self
                .blobs
                .iter()
                .map(|b| {
                    let d2 = (p - b.center).length_squared();
                    b.amplitude * (-d2 / (2.0 * b.sigma * b.sigma)).exp()
                })
                .sum::<f64>()
    }

    /// Renders the scene moved by `shift`: content at `p` appears at `p + shift`.
    pub fn render(&self, width: usize, height: usize, shift: DVec2) -> Buffer2<f64> {
        Buffer2::from_fn(width, height, |x, y| {
            self.value(DVec2::new(x as f64, y as f64) - shift)
        })
    }

    /// Image sampled through `geometry`, with world coordinates divided by `world_scale`
    /// to give scene coordinates.
    pub fn render_geo(&self, width: usize, height: usize, geometry: GeoTransform, world_scale: f64) -> MemoryImage {
        let band = Buffer2::from_fn(width, height, |x, y| {
            let world = geometry.pixel_to_world(DVec2::new(x as f64, y as f64));
            self.value(world / world_scale)
        });
        MemoryImage::single_band(band).with_projection(geometry)
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
