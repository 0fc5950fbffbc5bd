//! Audience Filter: predicate application with an explicit fallback chain.
//!
//! Strategies are tried in order until one yields a workable subset:
//! 1. the full conjunctive predicate,
//! 2. the predicate with the least-confident constraint dropped (repeated),
//! 3. a seeded unweighted random sample.
//!
//! A thin subset is therefore never surfaced as an error.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use crate::pipeline::goal::GoalAnalysis;
use crate::population::Population;

/// How the subset was finally selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum SamplingMethod {
    /// All derived constraints applied.
    ExactFilter,
    /// Some constraints dropped, least-confident first.
    Relaxed { dropped: Vec<String> },
    /// Unweighted random sample of the whole population.
    RandomFallback,
}

/// Indices into the population, plus how they were chosen.
#[derive(Debug, Clone)]
pub struct AudienceSubset {
    pub indices: Vec<usize>,
    pub method: SamplingMethod,
    /// Human-readable description of the constraints actually applied.
    pub filters_applied: Vec<String>,
    /// True when the filtered result exceeded the cap and was sampled down,
    /// so `indices` is a random sample of the filter match, not all of it.
    pub downsampled: bool,
}

impl AudienceSubset {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Select the audience for `analysis` from `population`.
///
/// Postcondition: the subset has at least `min(min_subset_size, population
/// size)` members and at most `max_subset_size`.
pub fn select(
    population: &Population,
    analysis: &GoalAnalysis,
    min_subset_size: usize,
    max_subset_size: usize,
    seed: u64,
) -> AudienceSubset {
    let records = population.records();
    let floor = min_subset_size.min(records.len());

    // Constraints ordered most-confident first; relaxation pops from the back.
    let mut active = analysis.constraints.clone();
    active.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut dropped: Vec<String> = Vec::new();

    loop {
        if active.is_empty() {
            break;
        }
        let indices: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| active.iter().all(|c| c.constraint.matches(r)))
            .map(|(i, _)| i)
            .collect();

        if indices.len() >= floor {
            let method = if dropped.is_empty() {
                SamplingMethod::ExactFilter
            } else {
                SamplingMethod::Relaxed {
                    dropped: dropped.clone(),
                }
            };
            let filters_applied = active
                .iter()
                .map(|c| c.constraint.describe())
                .collect::<Vec<_>>();
            return cap_subset(indices, max_subset_size, seed, method, filters_applied);
        }

        let removed = active.pop().expect("active is non-empty");
        tracing::debug!(
            "Audience below {} users; relaxing constraint '{}' (confidence {:.2})",
            floor,
            removed.constraint.describe(),
            removed.confidence
        );
        dropped.push(removed.constraint.describe());
    }

    // No constraints left (or none to begin with): sample the population.
    if records.len() <= floor {
        return AudienceSubset {
            indices: (0..records.len()).collect(),
            method: SamplingMethod::RandomFallback,
            filters_applied: Vec::new(),
            downsampled: false,
        };
    }

    tracing::debug!(
        "No usable filter for goal '{}'; sampling {} of {} users",
        analysis.goal,
        floor,
        records.len()
    );
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..records.len()).collect();
    indices.shuffle(&mut rng);
    indices.truncate(floor);
    indices.sort_unstable();
    AudienceSubset {
        indices,
        method: SamplingMethod::RandomFallback,
        filters_applied: Vec::new(),
        downsampled: false,
    }
}

/// Downsample oversized subsets so clustering stays tractable.
fn cap_subset(
    mut indices: Vec<usize>,
    max_subset_size: usize,
    seed: u64,
    method: SamplingMethod,
    filters_applied: Vec<String>,
) -> AudienceSubset {
    let downsampled = indices.len() > max_subset_size;
    if downsampled {
        tracing::debug!(
            "Filtered audience of {} exceeds cap {}; downsampling",
            indices.len(),
            max_subset_size
        );
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        indices.truncate(max_subset_size);
        indices.sort_unstable();
    }
    AudienceSubset {
        indices,
        method,
        filters_applied,
        downsampled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::goal;

    #[test]
    fn exact_filter_when_subset_is_large_enough() {
        let pop = Population::synthesize(2_000, 42);
        let analysis = goal::analyze("college students");
        let subset = select(&pop, &analysis, 50, 5_000, 42);

        assert_eq!(subset.method, SamplingMethod::ExactFilter);
        assert!(subset.len() >= 50);
        for &i in &subset.indices {
            let age = pop.records()[i].age;
            assert!((18..=25).contains(&age));
        }
    }

    #[test]
    fn relaxes_before_falling_back() {
        // Tier-3 + age 18-25 + high privacy is narrow in a small population;
        // the least-confident constraint goes first.
        let pop = Population::synthesize(300, 42);
        let analysis = goal::analyze("privacy focused college students in tier-3 cities");
        let subset = select(&pop, &analysis, 120, 5_000, 42);

        assert!(subset.len() >= 120 || subset.len() == pop.len());
        match &subset.method {
            SamplingMethod::Relaxed { dropped } => assert!(!dropped.is_empty()),
            SamplingMethod::RandomFallback => {}
            SamplingMethod::ExactFilter => panic!("narrow filter should not pass exactly"),
        }
    }

    #[test]
    fn unmatched_goal_uses_random_fallback_of_threshold_size() {
        let pop = Population::synthesize(1_000, 42);
        let analysis = goal::analyze("qqqq zzzz");
        let subset = select(&pop, &analysis, 200, 5_000, 42);

        assert_eq!(subset.method, SamplingMethod::RandomFallback);
        assert_eq!(subset.len(), 200);
    }

    #[test]
    fn fallback_sampling_is_reproducible_per_seed() {
        let pop = Population::synthesize(1_000, 42);
        let analysis = goal::analyze("");
        let a = select(&pop, &analysis, 200, 5_000, 7);
        let b = select(&pop, &analysis, 200, 5_000, 7);
        assert_eq!(a.indices, b.indices);

        let c = select(&pop, &analysis, 200, 5_000, 8);
        assert_ne!(a.indices, c.indices);
    }

    #[test]
    fn tiny_population_is_returned_whole() {
        let pop = Population::synthesize(40, 42);
        let analysis = goal::analyze("");
        let subset = select(&pop, &analysis, 200, 5_000, 42);
        assert_eq!(subset.len(), 40);
    }

    #[test]
    fn oversized_subsets_are_capped_and_flagged() {
        let pop = Population::synthesize(3_000, 42);
        let analysis = goal::analyze("");
        let subset = select(&pop, &analysis, 200, 5_000, 42);
        assert!(subset.len() <= 5_000);
        assert!(!subset.downsampled);

        let analysis = goal::analyze("college students");
        let subset = select(&pop, &analysis, 10, 100, 42);
        assert_eq!(subset.len(), 100);
        assert!(subset.downsampled);
        assert_eq!(subset.method, SamplingMethod::ExactFilter);
    }

    #[test]
    fn uncapped_exact_filter_is_not_flagged_as_downsampled() {
        let pop = Population::synthesize(2_000, 42);
        let analysis = goal::analyze("college students");
        let subset = select(&pop, &analysis, 50, 5_000, 42);
        assert_eq!(subset.method, SamplingMethod::ExactFilter);
        assert!(!subset.downsampled);
    }
}
