use glam::{DVec2, DVec3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use strum::IntoEnumIterator;

use super::*;

fn base() -> GeoTransform {
    GeoTransform::north_up(DVec2::new(440_000.0, 3_760_000.0), 2.5)
}

/// Ties whose slave pixels are `truth(nominal)` plus Gaussian-ish noise.
fn ties_through(truth: &PlaneTransform, count: usize, noise: f64, seed: u64) -> Vec<TieGpt> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let nominal = DVec2::new(rng.random_range(0.0..1000.0), rng.random_range(0.0..1000.0));
            let jitter = DVec2::new(
                rng.random_range(-1.0..1.0) + rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0) + rng.random_range(-1.0..1.0),
            ) * noise;
            let ground = base().pixel_to_world(nominal);
            TieGpt {
                ground: DVec3::new(ground.x, ground.y, 0.0),
                slave: truth.apply(nominal) + jitter,
                score: 1.0,
            }
        })
        .collect()
}

fn truth_for(kind: ModelKind) -> PlaneTransform {
    match kind {
        ModelKind::Translation | ModelKind::ProjectionShift => {
            PlaneTransform::translation(DVec2::new(4.5, -3.25))
        }
        ModelKind::Similarity => PlaneTransform::similarity(DVec2::new(12.0, -5.0), 0.01, 1.002),
        ModelKind::Affine | ModelKind::ProjectionAffine => {
            PlaneTransform::affine([1.001, 0.003, 6.0, -0.002, 0.999, -2.0])
        }
        ModelKind::Homography => PlaneTransform {
            matrix: [1.0, 0.002, 3.0, -0.001, 1.001, 8.0, 2e-6, -1e-6, 1.0],
        },
    }
}

#[test]
fn test_every_kind_recovers_exact_ties() {
    for kind in ModelKind::iter() {
        let truth = truth_for(kind);
        let ties = ties_through(&truth, 30, 0.0, 1);
        let mut model = GeometricModel::new(kind, base());
        assert_eq!(model.kind(), kind);

        let variance = model.optimize_fit(&ties, None).unwrap();
        assert!(variance < 1e-12, "{kind}: variance {variance}");
        for tie in &ties {
            assert!(pixel_residual(&model, tie) < 1e-6, "{kind}");
            let forward = model.forward(tie.ground.truncate());
            assert!((forward - tie.slave).length() < 1e-6, "{kind}");
        }
    }
}

#[test]
fn test_minimal_samples_fit_exactly() {
    for kind in ModelKind::iter() {
        let m = kind.degrees_of_freedom().div_ceil(2);
        let ties = ties_through(&truth_for(kind), m, 0.0, 2);
        let mut model = GeometricModel::new(kind, base());
        let variance = model.optimize_fit(&ties, None);
        assert!(variance.is_some_and(|v| v < 1e-12), "{kind}: {variance:?}");
    }
}

#[test]
fn test_variance_reported_in_pixels() {
    // Uniform sum of two U(-1, 1) per axis, scaled: variance 2/3 * noise^2 per axis.
    let noise = 0.6;
    let expected = 2.0 / 3.0 * noise * noise;
    for kind in [ModelKind::Affine, ModelKind::ProjectionAffine] {
        let ties = ties_through(&truth_for(kind), 2000, noise, 3);
        let mut model = GeometricModel::new(kind, base());
        let variance = model.optimize_fit(&ties, None).unwrap();
        assert!(
            (variance - expected).abs() < 0.1 * expected,
            "{kind}: {variance} vs {expected}"
        );
    }
}

#[test]
fn test_degenerate_points_rejected() {
    let tie = ties_through(&PlaneTransform::identity(), 1, 0.0, 4)[0];
    let ties = vec![tie; 5];
    for kind in [ModelKind::Affine, ModelKind::ProjectionAffine, ModelKind::Homography] {
        let mut model = GeometricModel::new(kind, base());
        assert!(model.optimize_fit(&ties, None).is_none(), "{kind}");
    }
}

#[test]
fn test_adjustable_snapshot_restore() {
    let mut model = GeometricModel::new(ModelKind::ProjectionAffine, base());
    assert!(!model.use_forward());
    assert_eq!(model.meters_per_pixel(), 2.5);

    let snapshot = model.snapshot().unwrap();
    let probe = DVec2::new(100.0, 200.0);
    let before = model.inverse(probe);

    let ties = ties_through(&truth_for(ModelKind::ProjectionAffine), 10, 0.0, 5);
    model.optimize_fit(&ties, None).unwrap();
    assert!((model.inverse(probe) - before).length() > 1.0);

    model.restore(&snapshot);
    assert_eq!(model.inverse(probe), before);
}

#[test]
fn test_transform_snapshot_restore() {
    let mut model = GeometricModel::new(ModelKind::Homography, base());
    assert!(model.use_forward());

    let snapshot = model.snapshot().unwrap();
    let before = model.clone();
    let ties = ties_through(&truth_for(ModelKind::Homography), 10, 0.0, 7);
    model.optimize_fit(&ties, None).unwrap();
    assert_ne!(model, before);

    model.restore(&snapshot);
    assert_eq!(model, before);
}

#[test]
fn test_inverse_undoes_forward() {
    for kind in ModelKind::iter() {
        let ties = ties_through(&truth_for(kind), 20, 0.0, 6);
        let mut model = GeometricModel::new(kind, base());
        model.optimize_fit(&ties, None).unwrap();
        let ground = DVec2::new(440_800.0, 3_759_300.0);
        let back = model.inverse(model.forward(ground));
        assert!((back - ground).length() < 1e-6, "{kind}");
    }
}

#[test]
fn test_keyword_round_trip() {
    for kind in [ModelKind::Similarity, ModelKind::ProjectionShift] {
        let ties = ties_through(&truth_for(kind), 15, 0.0, 7);
        let mut model = GeometricModel::new(kind, base());
        model.optimize_fit(&ties, None).unwrap();

        let mut kwl = Keywordlist::new();
        model.save_state(&mut kwl, "model").unwrap();
        let expected_tag = if kind.is_adjustable() { "\"adjustable\"" } else { "\"transform\"" };
        assert_eq!(kwl.get("model.model"), Some(expected_tag));

        let text = kwl.to_string();
        let loaded = GeometricModel::load_state(&Keywordlist::parse(&text).unwrap(), "model").unwrap();
        assert_eq!(loaded.kind(), kind);
        for tie in &ties {
            let g = tie.ground.truncate();
            assert!((loaded.forward(g) - model.forward(g)).length() < 1e-9);
        }
    }
}
