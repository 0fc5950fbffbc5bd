//! Cluster Engine: seeded k-means with silhouette-driven k selection.
//!
//! Every k in the configured range is fitted; candidates where any cluster
//! falls under the minimum share are rejected before scoring. The silhouette
//! is computed against centroids rather than all pairs, which keeps selection
//! O(n * k) and fully deterministic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::pipeline::features::FeatureMatrix;

const MAX_ITERATIONS: usize = 100;
const CONVERGENCE_EPS: f64 = 1e-6;
const SCORE_TIE_EPS: f64 = 1e-6;

/// Final clustering of one audience subset.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterAssignment {
    pub k: usize,
    /// Cluster id per subset row, 0..k.
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub sizes: Vec<usize>,
    pub fractions: Vec<f64>,
    /// Centroid silhouette of the selected k, in [-1, 1].
    pub quality: f64,
    /// True when no k in range satisfied the share constraint and the
    /// smallest clusters were merged away instead.
    pub degenerate: bool,
}

struct KMeansFit {
    labels: Vec<usize>,
    centroids: Vec<Vec<f64>>,
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding, deterministic from `rng`.
fn init_centroids(matrix: &FeatureMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    let first = rng.gen_range(0..matrix.rows);
    centroids.push(matrix.row(first).to_vec());

    while centroids.len() < k {
        let weights: Vec<f64> = (0..matrix.rows)
            .map(|i| {
                centroids
                    .iter()
                    .map(|c| sq_dist(matrix.row(i), c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // All points coincide with a centroid; duplicate one.
            centroids.push(centroids[0].clone());
            continue;
        }
        let mut roll = rng.gen::<f64>() * total;
        let mut chosen = matrix.rows - 1;
        for (i, w) in weights.iter().enumerate() {
            if roll < *w {
                chosen = i;
                break;
            }
            roll -= w;
        }
        centroids.push(matrix.row(chosen).to_vec());
    }
    centroids
}

fn assign(matrix: &FeatureMatrix, centroids: &[Vec<f64>]) -> Vec<usize> {
    (0..matrix.rows)
        .map(|i| {
            let row = matrix.row(i);
            centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, sq_dist(row, centroid)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, _)| c)
                .expect("at least one centroid")
        })
        .collect()
}

fn recompute_centroids(matrix: &FeatureMatrix, labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0; matrix.cols]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(matrix.row(i)) {
            *s += v;
        }
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            for v in sum.iter_mut() {
                *v /= count as f64;
            }
        }
    }
    sums
}

fn fit_kmeans(matrix: &FeatureMatrix, k: usize, seed: u64) -> KMeansFit {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
    let mut centroids = init_centroids(matrix, k, &mut rng);
    let mut labels = assign(matrix, &centroids);

    for _ in 0..MAX_ITERATIONS {
        let next = recompute_centroids(matrix, &labels, k);
        let shift: f64 = centroids
            .iter()
            .zip(&next)
            .map(|(a, b)| sq_dist(a, b))
            .sum();
        centroids = next;
        labels = assign(matrix, &centroids);
        if shift < CONVERGENCE_EPS {
            break;
        }
    }

    KMeansFit { labels, centroids }
}

/// Mean of (b - a) / max(a, b) per point, where `a` is the distance to the
/// own centroid and `b` to the nearest other centroid.
fn centroid_silhouette(matrix: &FeatureMatrix, fit: &KMeansFit) -> f64 {
    if fit.centroids.len() < 2 || matrix.rows == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..matrix.rows {
        let row = matrix.row(i);
        let own = fit.labels[i];
        let a = sq_dist(row, &fit.centroids[own]).sqrt();
        let b = fit
            .centroids
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != own)
            .map(|(_, centroid)| sq_dist(row, centroid).sqrt())
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    total / matrix.rows as f64
}

fn sizes_of(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &label in labels {
        sizes[label] += 1;
    }
    sizes
}

/// Cluster the subset, scanning `k_min..=k_max` and keeping the silhouette
/// winner among candidates whose smallest cluster holds at least
/// `min_cluster_share` of the rows. Ties (within epsilon) prefer larger k.
pub fn run(
    matrix: &FeatureMatrix,
    k_min: usize,
    k_max: usize,
    min_cluster_share: f64,
    seed: u64,
) -> ClusterAssignment {
    if matrix.rows == 0 {
        return ClusterAssignment {
            k: 0,
            labels: Vec::new(),
            centroids: Vec::new(),
            sizes: Vec::new(),
            fractions: Vec::new(),
            quality: 0.0,
            degenerate: true,
        };
    }

    // Cannot split n rows into more than n clusters.
    let k_max = k_max.min(matrix.rows);
    let k_min = k_min.min(k_max);

    let mut best: Option<(f64, usize, KMeansFit)> = None;
    for k in k_min..=k_max {
        let fit = fit_kmeans(matrix, k, seed);
        let sizes = sizes_of(&fit.labels, k);
        let min_fraction = sizes
            .iter()
            .map(|&s| s as f64 / matrix.rows as f64)
            .fold(f64::INFINITY, f64::min);
        if min_fraction < min_cluster_share {
            tracing::debug!(
                "Rejecting k={} (smallest cluster {:.1}% < {:.1}%)",
                k,
                min_fraction * 100.0,
                min_cluster_share * 100.0
            );
            continue;
        }
        let score = centroid_silhouette(matrix, &fit);
        let better = match &best {
            None => true,
            Some((best_score, best_k, _)) => {
                score > best_score + SCORE_TIE_EPS
                    || (score > best_score - SCORE_TIE_EPS && k > *best_k)
            }
        };
        if better {
            best = Some((score, k, fit));
        }
    }

    match best {
        Some((quality, k, fit)) => finish(matrix, fit, k, quality, false),
        None => {
            // Every k produced an undersized cluster: fit the smallest k and
            // merge undersized clusters into their nearest neighbor.
            tracing::warn!(
                "No k in {}..={} met the {:.1}% share constraint; merging",
                k_min,
                k_max,
                min_cluster_share * 100.0
            );
            let merged = merge_undersized(matrix, fit_kmeans(matrix, k_min, seed), min_cluster_share);
            let k = merged.centroids.len();
            let quality = centroid_silhouette(matrix, &merged);
            finish(matrix, merged, k, quality, true)
        }
    }
}

fn finish(
    matrix: &FeatureMatrix,
    fit: KMeansFit,
    k: usize,
    quality: f64,
    degenerate: bool,
) -> ClusterAssignment {
    let sizes = sizes_of(&fit.labels, k);
    let fractions = sizes
        .iter()
        .map(|&s| s as f64 / matrix.rows.max(1) as f64)
        .collect();
    ClusterAssignment {
        k,
        labels: fit.labels,
        centroids: fit.centroids,
        sizes,
        fractions,
        quality,
        degenerate,
    }
}

/// Repeatedly fold the smallest undersized cluster into the cluster with the
/// nearest centroid until every remaining cluster meets the share floor or
/// only one cluster is left.
fn merge_undersized(matrix: &FeatureMatrix, mut fit: KMeansFit, min_share: f64) -> KMeansFit {
    loop {
        let k = fit.centroids.len();
        if k <= 1 {
            return fit;
        }
        let sizes = sizes_of(&fit.labels, k);
        let floor = (min_share * matrix.rows as f64).ceil() as usize;
        let victim = match sizes
            .iter()
            .enumerate()
            .filter(|(_, &s)| s < floor)
            .min_by_key(|(_, &s)| s)
        {
            Some((c, _)) => c,
            None => return fit,
        };
        let target = fit
            .centroids
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != victim)
            .min_by(|a, b| {
                sq_dist(a.1, &fit.centroids[victim])
                    .total_cmp(&sq_dist(b.1, &fit.centroids[victim]))
            })
            .map(|(c, _)| c)
            .expect("k > 1");

        for label in fit.labels.iter_mut() {
            if *label == victim {
                *label = target;
            }
            if *label > victim {
                *label -= 1;
            }
        }
        fit.centroids.remove(victim);
        let k = fit.centroids.len();
        fit.centroids = recompute_centroids(matrix, &fit.labels, k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{audience, features, goal};
    use crate::population::Population;

    fn matrix_for(goal_text: &str, n: usize) -> FeatureMatrix {
        let pop = Population::synthesize(n, 42);
        let analysis = goal::analyze(goal_text);
        let subset = audience::select(&pop, &analysis, 150, 5_000, 42);
        features::build(&pop, &subset, analysis.strategy)
    }

    #[test]
    fn k_stays_in_range_and_labels_cover_all_rows() {
        let matrix = matrix_for("reach everyone", 1_200);
        let assignment = run(&matrix, 2, 4, 0.03, 42);

        assert!((2..=4).contains(&assignment.k));
        assert_eq!(assignment.labels.len(), matrix.rows);
        assert!(assignment.labels.iter().all(|&l| l < assignment.k));
        assert_eq!(assignment.sizes.iter().sum::<usize>(), matrix.rows);
    }

    #[test]
    fn selection_is_deterministic_per_seed() {
        let matrix = matrix_for("college students", 1_500);
        let a = run(&matrix, 2, 4, 0.03, 42);
        let b = run(&matrix, 2, 4, 0.03, 42);
        assert_eq!(a.k, b.k);
        assert_eq!(a.labels, b.labels);
        assert!((a.quality - b.quality).abs() < 1e-12);
    }

    #[test]
    fn share_constraint_holds_on_accepted_candidates() {
        let matrix = matrix_for("budget buyers", 1_000);
        let assignment = run(&matrix, 2, 4, 0.05, 42);
        if !assignment.degenerate {
            for &fraction in &assignment.fractions {
                assert!(fraction >= 0.05, "fraction {}", fraction);
            }
        }
    }

    #[test]
    fn impossible_share_falls_back_to_merging() {
        let matrix = matrix_for("reach everyone", 600);
        // A 60% floor is unsatisfiable for k >= 2, forcing the merge path.
        let assignment = run(&matrix, 2, 4, 0.60, 42);
        assert!(assignment.degenerate);
        assert!(assignment.k >= 1);
        assert_eq!(assignment.labels.len(), matrix.rows);
    }

    #[test]
    fn quality_is_a_valid_silhouette() {
        let matrix = matrix_for("college students in tier-2 cities", 1_200);
        let assignment = run(&matrix, 2, 4, 0.03, 42);
        assert!((-1.0..=1.0).contains(&assignment.quality));
    }

    #[test]
    fn tiny_matrix_does_not_panic() {
        let matrix = matrix_for("reach", 30);
        let assignment = run(&matrix, 2, 4, 0.03, 42);
        assert!(assignment.k <= matrix.rows);
        assert_eq!(assignment.labels.len(), matrix.rows);
    }
}
