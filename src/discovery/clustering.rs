//! k-means over market-question embeddings. Seeded, reproducible centroid
//! init, grounded on `vault::execution`'s `StdRng`/`SeedableRng` usage —
//! here via `rand_chacha` so a fixed seed gives a fixed partition in tests
//! (spec.md §9's "clustering nondeterminism" note).

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const MAX_ITERATIONS: usize = 10;

pub fn k_for(n: usize) -> usize {
    (n / 10).max(5).min(n.max(1))
}

/// Euclidean distance between two equal-length vectors.
fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Runs k-means and returns a cluster index per input point.
pub fn k_means(points: &[Vec<f64>], k: usize, seed: u64) -> Vec<usize> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(points.len());
    let dim = points[0].len();

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let init_indices = sample(&mut rng, points.len(), k);
    let mut centroids: Vec<Vec<f64>> = init_indices.iter().map(|i| points[i].clone()).collect();

    let mut assignments = vec![0usize; points.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f64::INFINITY;
            for (c_idx, c) in centroids.iter().enumerate() {
                let d = distance(p, c);
                if d < best_dist {
                    best_dist = d;
                    best = c_idx;
                }
            }
            if assignments[i] != best {
                changed = true;
            }
            assignments[i] = best;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &a) in points.iter().zip(assignments.iter()) {
            counts[a] += 1;
            for (s, v) in sums[a].iter_mut().zip(p.iter()) {
                *s += v;
            }
        }
        for c_idx in 0..k {
            if counts[c_idx] > 0 {
                for (s, c) in sums[c_idx].iter().zip(centroids[c_idx].iter_mut()) {
                    *c = s / counts[c_idx] as f64;
                }
            }
        }

        if !changed {
            break;
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_obviously_distinct_clusters() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 9.9],
        ];
        let assignments = k_means(&points, 2, 42);
        assert_eq!(assignments[0], assignments[1]);
        assert_eq!(assignments[2], assignments[3]);
        assert_ne!(assignments[0], assignments[2]);
    }

    #[test]
    fn seed_is_reproducible() {
        let points: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i * 2) as f64]).collect();
        let a = k_means(&points, 5, 7);
        let b = k_means(&points, 5, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn k_for_formula() {
        assert_eq!(k_for(30), 5);
        assert_eq!(k_for(100), 10);
        assert_eq!(k_for(1), 1);
    }
}
