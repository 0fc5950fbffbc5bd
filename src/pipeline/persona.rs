//! Persona Synthesizer: labeled clusters -> named, chattable personas.
//!
//! Identity is a pure function of the goal, the cluster and the persona slot,
//! so repeated requests return the same people. Names are drawn from fixed
//! tables keyed by the cluster's dominant city tier.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::pipeline::label::ClusterProfile;

/// Clusters at or above this size get a third persona.
const THIRD_PERSONA_SIZE: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraitLevel {
    High,
    Medium,
    Low,
}

impl TraitLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraitLevel::High => "High",
            TraitLevel::Medium => "Medium",
            TraitLevel::Low => "Low",
        }
    }

    pub fn from_share(v: f64) -> Self {
        if v >= 0.6 {
            TraitLevel::High
        } else if v >= 0.35 {
            TraitLevel::Medium
        } else {
            TraitLevel::Low
        }
    }
}

/// Behavioral dials the conversation engine keys its templates off.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaTraits {
    pub price_sensitivity: TraitLevel,
    pub privacy_concern: TraitLevel,
    pub brand_awareness: TraitLevel,
    pub tech_affinity: TraitLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct Persona {
    /// Stable id of the form `dyn_<cluster_id>_<slot>`.
    pub id: String,
    pub cluster_id: usize,
    pub name: String,
    pub age: u8,
    pub city_tier: String,
    pub income_band: String,
    pub occupation: String,
    pub personality: String,
    pub traits: PersonaTraits,
    /// Exactly two things this persona cares about.
    pub cares_about: [String; 2],
    /// Exactly one purchase barrier.
    pub barrier: String,
    pub preferred_media: String,
    pub secondary_media: Option<String>,
    /// Which cluster this persona represents, in words.
    pub cluster_linkage: String,
    /// Engagement estimate inherited from the cluster, with a small
    /// per-persona offset. In [0, 1].
    pub behavioral_score: f64,
}

const FIRST_NAMES_TIER1: &[&str] = &[
    "Aarav", "Ananya", "Rohan", "Ishita", "Kabir", "Meera", "Arjun", "Diya",
];
const FIRST_NAMES_TIER2: &[&str] = &[
    "Nikhil", "Pooja", "Sandeep", "Kavya", "Rahul", "Sneha", "Vivek", "Anjali",
];
const FIRST_NAMES_TIER3: &[&str] = &[
    "Ramesh", "Sunita", "Mahesh", "Lakshmi", "Suresh", "Geeta", "Dinesh", "Radha",
];
const SURNAMES: &[&str] = &[
    "Sharma", "Patel", "Reddy", "Iyer", "Khan", "Das", "Gupta", "Nair", "Singh", "Mehta",
];

const OCCUPATIONS_YOUNG: &[&str] = &[
    "college student",
    "junior software developer",
    "delivery partner",
    "design intern",
];
const OCCUPATIONS_MID: &[&str] = &[
    "school teacher",
    "bank officer",
    "shop owner",
    "marketing executive",
    "nurse",
];
const OCCUPATIONS_SENIOR: &[&str] = &[
    "operations manager",
    "civil engineer",
    "small business owner",
    "accountant",
];

fn seed_for(goal: &str, cluster_id: usize, slot: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    goal.hash(&mut hasher);
    cluster_id.hash(&mut hasher);
    slot.hash(&mut hasher);
    hasher.finish()
}

fn first_names_for(tier: &str) -> &'static [&'static str] {
    match tier {
        "Tier-1" => FIRST_NAMES_TIER1,
        "Tier-2" => FIRST_NAMES_TIER2,
        _ => FIRST_NAMES_TIER3,
    }
}

fn occupations_for(age: u8) -> &'static [&'static str] {
    if age <= 25 {
        OCCUPATIONS_YOUNG
    } else if age <= 40 {
        OCCUPATIONS_MID
    } else {
        OCCUPATIONS_SENIOR
    }
}

/// How many personas a cluster of `size` members gets.
pub fn persona_count(size: usize) -> usize {
    if size >= THIRD_PERSONA_SIZE {
        3
    } else {
        2
    }
}

/// Synthesize the personas for one labeled cluster.
pub fn synthesize(goal: &str, profile: &ClusterProfile) -> Vec<Persona> {
    (0..persona_count(profile.size))
        .map(|slot| build_persona(goal, profile, slot))
        .collect()
}

fn build_persona(goal: &str, profile: &ClusterProfile, slot: usize) -> Persona {
    let mut rng = StdRng::seed_from_u64(seed_for(goal, profile.cluster_id, slot));
    let demo = &profile.demographics;

    // Scatter ages around the cluster mean so siblings differ.
    let age = (demo.mean_age + rng.gen_range(-6.0..=6.0)).clamp(18.0, 65.0) as u8;

    let first_names = first_names_for(&demo.dominant_city_tier);
    let name = format!(
        "{} {}",
        first_names[rng.gen_range(0..first_names.len())],
        SURNAMES[rng.gen_range(0..SURNAMES.len())]
    );
    let occupations = occupations_for(age);
    let occupation = occupations[rng.gen_range(0..occupations.len())].to_string();

    let traits = traits_from_profile(profile);
    let cares_about = cares_about(&traits, profile);
    let barrier = barrier(&traits, profile);

    let personality = format!(
        "{}-year-old {} from a {} city, {} income household. {}",
        age,
        occupation,
        demo.dominant_city_tier,
        demo.dominant_income_band.to_lowercase(),
        personality_line(&traits)
    );

    let behavioral_score =
        (profile.engagement_score + rng.gen_range(-0.05..=0.05)).clamp(0.0, 1.0);

    Persona {
        id: format!("dyn_{}_{}", profile.cluster_id, slot),
        cluster_id: profile.cluster_id,
        name,
        age,
        city_tier: demo.dominant_city_tier.clone(),
        income_band: demo.dominant_income_band.clone(),
        occupation,
        personality,
        traits,
        cares_about,
        barrier,
        preferred_media: demo.top_media_channel.clone(),
        secondary_media: demo.secondary_media_channel.clone(),
        cluster_linkage: format!(
            "One of {} users in the \"{}\" segment",
            profile.size, profile.label
        ),
        behavioral_score,
    }
}

fn traits_from_profile(profile: &ClusterProfile) -> PersonaTraits {
    let has = |needle: &str| profile.traits.iter().any(|t| t.contains(needle));

    let price_sensitivity = if has("price-sensitive") || profile.label.contains("Budget") {
        TraitLevel::High
    } else if profile.label.contains("Premium") {
        TraitLevel::Low
    } else {
        TraitLevel::Medium
    };

    let privacy_concern = if has("Privacy-guarded") {
        TraitLevel::High
    } else if has("data-sharing") {
        TraitLevel::Low
    } else {
        TraitLevel::Medium
    };

    let brand_awareness = if has("Brand-aware") {
        TraitLevel::High
    } else if has("Brand-agnostic") {
        TraitLevel::Low
    } else {
        TraitLevel::Medium
    };

    let tech_affinity = if profile.label.contains("Tech-Savvy") {
        TraitLevel::High
    } else if profile.label.contains("Low-Tech") {
        TraitLevel::Low
    } else {
        TraitLevel::Medium
    };

    PersonaTraits {
        price_sensitivity,
        privacy_concern,
        brand_awareness,
        tech_affinity,
    }
}

fn cares_about(traits: &PersonaTraits, profile: &ClusterProfile) -> [String; 2] {
    let mut picks: Vec<String> = Vec::new();
    if traits.price_sensitivity == TraitLevel::High {
        picks.push("getting clear value for money".to_string());
    }
    if traits.privacy_concern == TraitLevel::High {
        picks.push("keeping personal data private".to_string());
    }
    if traits.brand_awareness == TraitLevel::High {
        picks.push("buying brands they recognize and trust".to_string());
    }
    if traits.tech_affinity == TraitLevel::High {
        picks.push("having the latest features".to_string());
    }
    if TraitLevel::from_share(profile.demographics.emi_share) == TraitLevel::High {
        picks.push("flexible payment options".to_string());
    }
    picks.push("recommendations from family and friends".to_string());
    picks.push("reliable after-sales service".to_string());

    [picks[0].clone(), picks[1].clone()]
}

fn barrier(traits: &PersonaTraits, profile: &ClusterProfile) -> String {
    if traits.price_sensitivity == TraitLevel::High {
        "hesitates when the price feels higher than alternatives".to_string()
    } else if traits.privacy_concern == TraitLevel::High {
        "drops out when asked for too much personal information".to_string()
    } else if traits.tech_affinity == TraitLevel::Low {
        "gets discouraged by complicated setup steps".to_string()
    } else if profile.demographics.emi_share >= 0.6 {
        "needs an installment option before committing".to_string()
    } else {
        "waits for a trusted review before trying anything new".to_string()
    }
}

fn personality_line(traits: &PersonaTraits) -> &'static str {
    match (traits.price_sensitivity, traits.tech_affinity) {
        (TraitLevel::High, TraitLevel::High) => {
            "Researches every purchase online and compares prices obsessively."
        }
        (TraitLevel::High, _) => "Careful with money and sticks to what has worked before.",
        (TraitLevel::Low, TraitLevel::High) => {
            "Early adopter who enjoys premium products and talks about them."
        }
        (TraitLevel::Low, _) => "Comfortable spending on quality without much comparison.",
        _ => "Pragmatic shopper who balances price, quality and convenience.",
    }
}

/// Parse a persona id of the form `dyn_<cluster_id>_<slot>`.
pub fn parse_persona_id(id: &str) -> Option<(usize, usize)> {
    let rest = id.strip_prefix("dyn_")?;
    let (cluster, slot) = rest.split_once('_')?;
    Some((cluster.parse().ok()?, slot.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{audience, cluster, features, goal, label};
    use crate::population::Population;

    fn profiles_for(goal_text: &str, n: usize) -> Vec<ClusterProfile> {
        let pop = Population::synthesize(n, 42);
        let analysis = goal::analyze(goal_text);
        let subset = audience::select(&pop, &analysis, 150, 5_000, 42);
        let matrix = features::build(&pop, &subset, analysis.strategy);
        let assignment = cluster::run(&matrix, 2, 4, 0.03, 42);
        label::summarize(&pop, &subset, &assignment, analysis.intent)
    }

    #[test]
    fn persona_count_scales_with_cluster_size() {
        assert_eq!(persona_count(399), 2);
        assert_eq!(persona_count(400), 3);
    }

    #[test]
    fn personas_are_deterministic_per_goal_and_cluster() {
        let profiles = profiles_for("college students", 1_500);
        let a = synthesize("college students", &profiles[0]);
        let b = synthesize("college students", &profiles[0]);
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(&b) {
            assert_eq!(pa.id, pb.id);
            assert_eq!(pa.name, pb.name);
            assert_eq!(pa.age, pb.age);
            assert_eq!(pa.occupation, pb.occupation);
        }
    }

    #[test]
    fn different_goals_produce_different_identities() {
        let profiles = profiles_for("reach everyone", 1_200);
        let a = synthesize("reach everyone", &profiles[0]);
        let b = synthesize("budget phone buyers", &profiles[0]);
        assert!(a.iter().zip(&b).any(|(pa, pb)| pa.name != pb.name || pa.age != pb.age));
    }

    #[test]
    fn ids_are_slot_contiguous_and_parseable() {
        let profiles = profiles_for("reach everyone", 1_500);
        for profile in &profiles {
            let personas = synthesize("reach everyone", profile);
            for (slot, persona) in personas.iter().enumerate() {
                assert_eq!(persona.id, format!("dyn_{}_{}", profile.cluster_id, slot));
                assert_eq!(
                    parse_persona_id(&persona.id),
                    Some((profile.cluster_id, slot))
                );
            }
        }
    }

    #[test]
    fn cares_about_is_two_and_barrier_is_one() {
        let profiles = profiles_for("budget buyers on EMI", 1_200);
        for profile in &profiles {
            for persona in synthesize("budget buyers on EMI", profile) {
                assert_eq!(persona.cares_about.len(), 2);
                assert_ne!(persona.cares_about[0], persona.cares_about[1]);
                assert!(!persona.barrier.is_empty());
            }
        }
    }

    #[test]
    fn personas_carry_cluster_linkage_and_bounded_score() {
        let profiles = profiles_for("college students", 1_200);
        for profile in &profiles {
            for persona in synthesize("college students", profile) {
                assert!(persona.cluster_linkage.contains(&profile.label));
                assert!((0.0..=1.0).contains(&persona.behavioral_score));
            }
        }
    }

    #[test]
    fn parse_persona_id_rejects_malformed_ids() {
        assert_eq!(parse_persona_id("dyn_1_2"), Some((1, 2)));
        assert_eq!(parse_persona_id("dyn_1"), None);
        assert_eq!(parse_persona_id("per_1_2"), None);
        assert_eq!(parse_persona_id("dyn_x_2"), None);
    }
}
