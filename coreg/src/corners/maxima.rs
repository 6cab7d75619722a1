//! Local-maximum suppression and density thinning of cornerness maps.
//!
//! No-data is NaN. No-data neighbours never disqualify a candidate.

use common::Buffer2;

const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Keeps pixels that exceed all valid 8-neighbours.
///
/// With `strict`, a neighbour of equal value disqualifies the pixel;
/// otherwise plateaus survive.
pub fn local_maxima(input: &Buffer2<f64>, strict: bool) -> Buffer2<f64> {
    let (w, h) = (input.width(), input.height());
    Buffer2::from_fn(w, h, |x, y| {
        let value = input[(x, y)];
        if value.is_nan() {
            return f64::NAN;
        }
        let beaten = NEIGHBOURS.iter().any(|&(dx, dy)| {
            match input.checked_get(x as isize + dx, y as isize + dy) {
                Some(&n) if !n.is_nan() => {
                    if strict {
                        n >= value
                    } else {
                        n > value
                    }
                }
                _ => false,
            }
        });
        if beaten {
            f64::NAN
        } else {
            value
        }
    })
}

pub fn count_candidates(map: &Buffer2<f64>) -> usize {
    map.iter().filter(|v| !v.is_nan()).count()
}

/// Keeps the `ceil(density * area)` highest candidates and nulls the rest.
///
/// `density >= 1` leaves the map untouched and `density <= 0` nulls it.
/// Returns the number of surviving candidates.
pub fn thin_to_density(map: &mut Buffer2<f64>, density: f64) -> usize {
    if density <= 0.0 {
        map.fill(f64::NAN);
        return 0;
    }

    let mut candidates: Vec<usize> = (0..map.len()).filter(|&i| !map[i].is_nan()).collect();
    if density >= 1.0 {
        return candidates.len();
    }

    let keep = (density * map.len() as f64).ceil() as usize;
    if candidates.len() <= keep {
        return candidates.len();
    }

    // Partial selection: the first `keep` entries end up holding the highest scores.
    candidates.select_nth_unstable_by(keep - 1, |&a, &b| map[b].total_cmp(&map[a]));
    for &i in &candidates[keep..] {
        map[i] = f64::NAN;
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn random_map(seed: u64, w: usize, h: usize, null_fraction: f64) -> Buffer2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Buffer2::from_fn(w, h, |_, _| {
            if rng.random::<f64>() < null_fraction {
                f64::NAN
            } else {
                // Coarse values so that ties occur.
                (rng.random_range(0..20) as f64) * 0.5
            }
        })
    }

    fn same(a: &Buffer2<f64>, b: &Buffer2<f64>) -> bool {
        a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn test_single_peak() {
        let mut map = Buffer2::new_filled(5, 5, 1.0);
        map[(2, 2)] = 3.0;
        let maxima = local_maxima(&map, true);
        assert_eq!(count_candidates(&maxima), 1);
        assert_eq!(maxima[(2, 2)], 3.0);
    }

    #[test]
    fn test_plateau_strict_vs_relaxed() {
        let mut map = Buffer2::new_filled(4, 3, 0.0);
        map[(1, 1)] = 2.0;
        map[(2, 1)] = 2.0;
        assert_eq!(count_candidates(&local_maxima(&map, true)), 0);
        assert_eq!(count_candidates(&local_maxima(&map, false)), 2);
    }

    #[test]
    fn test_null_neighbours_do_not_block() {
        let mut map = Buffer2::new_filled(3, 3, f64::NAN);
        map[(1, 1)] = 0.5;
        let maxima = local_maxima(&map, true);
        assert_eq!(maxima[(1, 1)], 0.5);
    }

    #[test]
    fn test_local_maxima_idempotent() {
        for seed in 0..10 {
            let map = random_map(seed, 31, 17, 0.2);
            for strict in [true, false] {
                let once = local_maxima(&map, strict);
                let twice = local_maxima(&once, strict);
                assert!(same(&once, &twice), "seed {seed} strict {strict}");
            }
        }
    }

    #[test]
    fn test_thinning_bound() {
        for seed in 0..10 {
            let mut map = random_map(seed, 40, 25, 0.1);
            let density = 0.013;
            let limit = (density * 1000.0_f64).ceil() as usize;
            let survivors = thin_to_density(&mut map, density);
            assert!(survivors <= limit);
            assert_eq!(survivors, count_candidates(&map));
            assert!(survivors >= 1);
        }
    }

    #[test]
    fn test_thinning_keeps_highest() {
        let mut map = Buffer2::new(
            5,
            2,
            vec![1.0, 9.0, f64::NAN, 4.0, 7.0, 2.0, f64::NAN, 8.0, 3.0, 5.0],
        );
        let survivors = thin_to_density(&mut map, 0.25);
        assert_eq!(survivors, 3);
        let mut kept: Vec<f64> = map.iter().copied().filter(|v| !v.is_nan()).collect();
        kept.sort_by(f64::total_cmp);
        assert_eq!(kept, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_thinning_identity_and_all_null() {
        let map = random_map(5, 20, 20, 0.3);

        let mut full = map.clone();
        thin_to_density(&mut full, 1.0);
        assert!(same(&full, &map));

        let mut none = map.clone();
        assert_eq!(thin_to_density(&mut none, 0.0), 0);
        assert_eq!(count_candidates(&none), 0);

        let mut negative = map;
        thin_to_density(&mut negative, -0.5);
        assert_eq!(count_candidates(&negative), 0);
    }
}
