//! Cluster Labeler: raw cluster assignments -> human-readable profiles.
//!
//! Labels are composed from three demographic axes (tech adoption, dominant
//! city tier, price posture). Traits come from the metrics where a cluster
//! deviates most from the subset mean, measured in standard deviations.

use serde::Serialize;
use std::collections::HashMap;

use crate::pipeline::audience::AudienceSubset;
use crate::pipeline::cluster::ClusterAssignment;
use crate::pipeline::goal::IntentCategory;
use crate::population::{CityTier, IncomeBand, MediaChannel, Population, UserRecord};

/// Minimum standardized deviation for a metric to count as a trait.
const TRAIT_THRESHOLD: f64 = 0.25;
const MAX_TRAITS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Demographics {
    pub mean_age: f64,
    pub dominant_city_tier: String,
    pub dominant_income_band: String,
    pub top_media_channel: String,
    /// Second-most-common channel, when the cluster has more than one.
    pub secondary_media_channel: Option<String>,
    pub emi_share: f64,
    pub car_ownership_share: f64,
}

/// One labeled cluster, ready for persona synthesis and display.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub label: String,
    pub icon: String,
    pub description: String,
    pub traits: Vec<String>,
    pub demographics: Demographics,
    pub size: usize,
    pub share: f64,
    /// Separation quality of the whole clustering, rescaled to [0, 1].
    pub engagement_score: f64,
}

struct Metric {
    name: &'static str,
    high_trait: &'static str,
    low_trait: &'static str,
    value: fn(&UserRecord) -> f64,
}

const METRICS: &[Metric] = &[
    Metric {
        name: "price_sensitivity",
        high_trait: "Highly price-sensitive",
        low_trait: "Price-indifferent",
        value: |r| r.price_sensitivity,
    },
    Metric {
        name: "privacy_pref",
        high_trait: "Privacy-guarded",
        low_trait: "Openly data-sharing",
        value: |r| r.privacy_pref,
    },
    Metric {
        name: "brand_awareness",
        high_trait: "Brand-aware",
        low_trait: "Brand-agnostic",
        value: |r| r.brand_awareness,
    },
    Metric {
        name: "device_count",
        high_trait: "Multi-device household",
        low_trait: "Single-device user",
        value: |r| r.device_count as f64,
    },
    Metric {
        name: "age",
        high_trait: "Older demographic",
        low_trait: "Young demographic",
        value: |r| r.age as f64,
    },
    Metric {
        name: "income_rank",
        high_trait: "Affluent",
        low_trait: "Income-constrained",
        value: |r| r.income_band.rank(),
    },
    Metric {
        name: "emi_flag",
        high_trait: "EMI-reliant",
        low_trait: "Pays upfront",
        value: |r| r.emi_flag as u8 as f64,
    },
];

/// Build ordered profiles (largest cluster first) for an assignment. The
/// goal's intent only affects phrasing, never membership.
pub fn summarize(
    population: &Population,
    subset: &AudienceSubset,
    assignment: &ClusterAssignment,
    intent: IntentCategory,
) -> Vec<ClusterProfile> {
    let records = population.records();
    let members: Vec<Vec<&UserRecord>> = (0..assignment.k)
        .map(|c| {
            subset
                .indices
                .iter()
                .zip(&assignment.labels)
                .filter(|(_, &label)| label == c)
                .map(|(&idx, _)| &records[idx])
                .collect()
        })
        .collect();

    let all: Vec<&UserRecord> = subset.indices.iter().map(|&i| &records[i]).collect();
    let baseline: Vec<(f64, f64)> = METRICS
        .iter()
        .map(|m| mean_std(&all, m.value))
        .collect();

    let engagement_score = ((assignment.quality + 1.0) / 2.0).clamp(0.0, 1.0);

    let mut profiles: Vec<ClusterProfile> = members
        .iter()
        .enumerate()
        .filter(|(_, group)| !group.is_empty())
        .map(|(cluster_id, group)| {
            let demographics = demographics_of(group);
            let traits = traits_of(group, &baseline);
            let (label, icon) = label_of(group, &demographics);
            let description = describe(group.len(), &demographics, &traits, intent);
            ClusterProfile {
                cluster_id,
                label,
                icon,
                description,
                traits,
                demographics,
                size: group.len(),
                share: group.len() as f64 / all.len().max(1) as f64,
                engagement_score,
            }
        })
        .collect();

    profiles.sort_by(|a, b| b.size.cmp(&a.size).then(a.cluster_id.cmp(&b.cluster_id)));
    profiles
}

fn mean_std(records: &[&UserRecord], value: fn(&UserRecord) -> f64) -> (f64, f64) {
    let n = records.len().max(1) as f64;
    let mean = records.iter().map(|r| value(r)).sum::<f64>() / n;
    let var = records
        .iter()
        .map(|r| {
            let d = value(r) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

fn demographics_of(group: &[&UserRecord]) -> Demographics {
    let n = group.len().max(1) as f64;
    let mean_age = group.iter().map(|r| r.age as f64).sum::<f64>() / n;

    let mut tiers: HashMap<CityTier, usize> = HashMap::new();
    let mut incomes: HashMap<IncomeBand, usize> = HashMap::new();
    let mut media: HashMap<MediaChannel, usize> = HashMap::new();
    for r in group {
        *tiers.entry(r.city_tier).or_default() += 1;
        *incomes.entry(r.income_band).or_default() += 1;
        *media.entry(r.preferred_media).or_default() += 1;
    }

    let mut ranked_media: Vec<(&str, usize)> = media
        .iter()
        .map(|(m, &count)| (m.as_str(), count))
        .collect();
    ranked_media.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    Demographics {
        mean_age,
        dominant_city_tier: dominant(&tiers, |t| t.as_str()),
        dominant_income_band: dominant(&incomes, |b| b.as_str()),
        top_media_channel: ranked_media
            .first()
            .map(|(m, _)| m.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        secondary_media_channel: ranked_media.get(1).map(|(m, _)| m.to_string()),
        emi_share: group.iter().filter(|r| r.emi_flag).count() as f64 / n,
        car_ownership_share: group.iter().filter(|r| r.owns_car).count() as f64 / n,
    }
}

fn describe(
    size: usize,
    demographics: &Demographics,
    traits: &[String],
    intent: IntentCategory,
) -> String {
    format!(
        "{} users around age {:.0}, mostly {} income in {} cities, best reached via {}. \
         {}. Surfaced for a {} objective.",
        size,
        demographics.mean_age,
        demographics.dominant_income_band.to_lowercase(),
        demographics.dominant_city_tier,
        demographics.top_media_channel,
        traits.join("; "),
        intent.as_str()
    )
}

fn dominant<K: Copy + Eq + std::hash::Hash>(
    counts: &HashMap<K, usize>,
    as_str: fn(K) -> &'static str,
) -> String {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(as_str(*b.0).cmp(as_str(*a.0))))
        .map(|(&k, _)| as_str(k).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn traits_of(group: &[&UserRecord], baseline: &[(f64, f64)]) -> Vec<String> {
    let mut scored: Vec<(f64, &'static str)> = METRICS
        .iter()
        .zip(baseline)
        .filter_map(|(metric, &(mean, std))| {
            if std <= 1e-9 {
                return None;
            }
            let (cluster_mean, _) = mean_std(group, metric.value);
            let deviation = (cluster_mean - mean) / std;
            if deviation.abs() < TRAIT_THRESHOLD {
                return None;
            }
            let name = if deviation > 0.0 {
                metric.high_trait
            } else {
                metric.low_trait
            };
            Some((deviation.abs(), name))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(MAX_TRAITS);
    if scored.is_empty() {
        vec!["Close to the audience average".to_string()]
    } else {
        scored.into_iter().map(|(_, name)| name.to_string()).collect()
    }
}

fn label_of(group: &[&UserRecord], demographics: &Demographics) -> (String, String) {
    let n = group.len().max(1) as f64;
    let mean_devices = group.iter().map(|r| r.device_count as f64).sum::<f64>() / n;
    let mean_price = group.iter().map(|r| r.price_sensitivity).sum::<f64>() / n;

    let (tech, tech_icon) = if mean_devices >= 4.0 {
        ("Tech-Savvy", "📱")
    } else if mean_devices >= 2.0 {
        ("Mainstream Tech", "💻")
    } else {
        ("Low-Tech", "📻")
    };

    let (city, city_icon) = match demographics.dominant_city_tier.as_str() {
        "Tier-1" => ("Metro", "🏙️"),
        "Tier-2" => ("Tier-2 City", "🌆"),
        _ => ("Tier-3 Town", "🏘️"),
    };

    let (price, price_icon) = if mean_price >= 0.6 {
        ("Budget-Conscious", "💰")
    } else if mean_price >= 0.4 {
        ("Balanced Spender", "⚖️")
    } else {
        ("Premium-Leaning", "✨")
    };

    (
        format!("{} • {} • {}", tech, city, price),
        format!("{}{}{}", tech_icon, city_icon, price_icon),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{audience, cluster, features, goal};

    fn profiles_for(goal_text: &str, n: usize) -> Vec<ClusterProfile> {
        let pop = Population::synthesize(n, 42);
        let analysis = goal::analyze(goal_text);
        let subset = audience::select(&pop, &analysis, 150, 5_000, 42);
        let matrix = features::build(&pop, &subset, analysis.strategy);
        let assignment = cluster::run(&matrix, 2, 4, 0.03, 42);
        summarize(&pop, &subset, &assignment, analysis.intent)
    }

    #[test]
    fn profiles_cover_the_subset_in_descending_size() {
        let profiles = profiles_for("reach everyone", 1_200);
        assert!(profiles.len() >= 2);
        for pair in profiles.windows(2) {
            assert!(pair[0].size >= pair[1].size);
        }
        let total: f64 = profiles.iter().map(|p| p.share).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn labels_follow_the_three_axis_format() {
        for profile in profiles_for("college students", 1_500) {
            let parts: Vec<&str> = profile.label.split(" • ").collect();
            assert_eq!(parts.len(), 3, "label '{}'", profile.label);
            assert!(!profile.icon.is_empty());
        }
    }

    #[test]
    fn every_profile_has_one_to_three_traits() {
        for profile in profiles_for("budget buyers on EMI", 1_200) {
            assert!(!profile.traits.is_empty());
            assert!(profile.traits.len() <= MAX_TRAITS);
        }
    }

    #[test]
    fn description_names_size_and_reach_channel() {
        for profile in profiles_for("college students", 1_200) {
            assert!(profile.description.contains(&profile.size.to_string()));
            assert!(profile
                .description
                .contains(&profile.demographics.top_media_channel));
            if let Some(secondary) = &profile.demographics.secondary_media_channel {
                assert_ne!(secondary, &profile.demographics.top_media_channel);
            }
        }
    }

    #[test]
    fn engagement_score_stays_in_unit_range() {
        for profile in profiles_for("premium flagship phones", 1_000) {
            assert!((0.0..=1.0).contains(&profile.engagement_score));
        }
    }
}
