//! Goal Analyzer: free-text goal -> structured intent descriptor.
//!
//! Matching runs over a fixed table of concept groups (tag, intent category,
//! keywords, filter fragment, feature strategy) in priority order. New
//! concepts are new table rows; no runtime dispatch beyond the table scan.

use serde::Serialize;

use crate::population::{CityTier, IncomeBand, UserRecord};

/// Confidence assigned when no keyword matches at all; the goal then resolves
/// to the generic `Reach` intent with an empty filter.
pub const NO_MATCH_CONFIDENCE: f64 = 0.30;

/// Strategy name used when no matched concept prescribes domain features.
pub const GENERIC_STRATEGY: &str = "generic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Parenting,
    Generation,
    Lifestyle,
    Geography,
    Interest,
    Budget,
    Reach,
    Convert,
    Retain,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Parenting => "parenting",
            IntentCategory::Generation => "generation",
            IntentCategory::Lifestyle => "lifestyle",
            IntentCategory::Geography => "geography",
            IntentCategory::Interest => "interest",
            IntentCategory::Budget => "budget",
            IntentCategory::Reach => "reach",
            IntentCategory::Convert => "convert",
            IntentCategory::Retain => "retain",
        }
    }
}

/// One field constraint on the user population. Constraints from different
/// concept groups are conjoined; two constraints on the same field are
/// resolved by keeping the higher-confidence one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Constraint {
    AgeBetween(u8, u8),
    CityTierIs(CityTier),
    IncomeIn(IncomeBand),
    MinDevices(u8),
    MinPrivacy(f64),
    MinPriceSensitivity(f64),
    MinBrandAwareness(f64),
    UsesEmi,
}

impl Constraint {
    /// The population field this constraint binds; used for conflict
    /// resolution between concept groups.
    pub fn field_key(&self) -> &'static str {
        match self {
            Constraint::AgeBetween(..) => "age",
            Constraint::CityTierIs(_) => "city_tier",
            Constraint::IncomeIn(_) => "income_band",
            Constraint::MinDevices(_) => "device_count",
            Constraint::MinPrivacy(_) => "privacy_pref",
            Constraint::MinPriceSensitivity(_) => "price_sensitivity",
            Constraint::MinBrandAwareness(_) => "brand_awareness",
            Constraint::UsesEmi => "emi_flag",
        }
    }

    pub fn matches(&self, record: &UserRecord) -> bool {
        match self {
            Constraint::AgeBetween(lo, hi) => (*lo..=*hi).contains(&record.age),
            Constraint::CityTierIs(tier) => record.city_tier == *tier,
            Constraint::IncomeIn(band) => record.income_band == *band,
            Constraint::MinDevices(n) => record.device_count >= *n,
            Constraint::MinPrivacy(v) => record.privacy_pref >= *v,
            Constraint::MinPriceSensitivity(v) => record.price_sensitivity >= *v,
            Constraint::MinBrandAwareness(v) => record.brand_awareness >= *v,
            Constraint::UsesEmi => record.emi_flag,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Constraint::AgeBetween(lo, hi) => format!("age {}-{}", lo, hi),
            Constraint::CityTierIs(tier) => format!("city tier {}", tier.as_str()),
            Constraint::IncomeIn(band) => format!("{} income", band.as_str()),
            Constraint::MinDevices(n) => format!("device count >= {}", n),
            Constraint::MinPrivacy(v) => format!("privacy preference >= {:.2}", v),
            Constraint::MinPriceSensitivity(v) => format!("price sensitivity >= {:.2}", v),
            Constraint::MinBrandAwareness(v) => format!("brand awareness >= {:.2}", v),
            Constraint::UsesEmi => "uses EMI".to_string(),
        }
    }
}

/// A constraint together with where it came from, so the audience filter can
/// relax the least-confident one first.
#[derive(Debug, Clone, Serialize)]
pub struct FilterConstraint {
    pub source_tag: &'static str,
    pub confidence: f64,
    pub constraint: Constraint,
}

/// A concept group the goal matched, with the keywords that hit.
#[derive(Debug, Clone, Serialize)]
pub struct ConceptMatch {
    pub tag: &'static str,
    pub intent: IntentCategory,
    pub matched_keywords: Vec<&'static str>,
    pub confidence: f64,
}

/// Structured analysis of one goal string. Created once per request.
#[derive(Debug, Clone, Serialize)]
pub struct GoalAnalysis {
    pub goal: String,
    pub concepts: Vec<ConceptMatch>,
    pub intent: IntentCategory,
    pub confidence: f64,
    pub constraints: Vec<FilterConstraint>,
    pub strategy: &'static str,
}

struct ConceptGroup {
    tag: &'static str,
    intent: IntentCategory,
    keywords: &'static [&'static str],
    constraints: &'static [Constraint],
    strategy: &'static str,
}

/// Fixed taxonomy, scanned in priority order. Earlier rows win intent ties.
/// Keywords are whole-word token sequences (see `keyword_matches`); inflected
/// forms are listed explicitly.
const CONCEPT_GROUPS: &[ConceptGroup] = &[
    ConceptGroup {
        tag: "students",
        intent: IntentCategory::Generation,
        keywords: &[
            "college", "student", "students", "gen z", "genz", "teen", "teens",
            "teenager", "teenagers", "young", "youth",
        ],
        constraints: &[Constraint::AgeBetween(18, 25)],
        strategy: "youth_lifestyle",
    },
    ConceptGroup {
        tag: "parenting",
        intent: IntentCategory::Parenting,
        keywords: &[
            "parent", "parents", "parenting", "family", "families", "kids",
            "children", "mom", "moms", "dad", "dads",
        ],
        constraints: &[Constraint::AgeBetween(26, 45)],
        strategy: "family_lifestyle",
    },
    ConceptGroup {
        tag: "tier2_cities",
        intent: IntentCategory::Geography,
        keywords: &["tier 2"],
        constraints: &[Constraint::CityTierIs(CityTier::Tier2)],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "tier3_cities",
        intent: IntentCategory::Geography,
        keywords: &["tier 3"],
        constraints: &[Constraint::CityTierIs(CityTier::Tier3)],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "metro_cities",
        intent: IntentCategory::Geography,
        keywords: &["tier 1", "metro", "metros"],
        constraints: &[Constraint::CityTierIs(CityTier::Tier1)],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "commuters",
        intent: IntentCategory::Lifestyle,
        keywords: &["commute", "commuter", "commuters", "commuting"],
        constraints: &[Constraint::MinDevices(2)],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "privacy_minded",
        intent: IntentCategory::Interest,
        keywords: &["privacy", "private", "data conscious"],
        constraints: &[Constraint::MinPrivacy(0.6)],
        strategy: "privacy_guarded",
    },
    ConceptGroup {
        tag: "budget_seekers",
        intent: IntentCategory::Budget,
        keywords: &[
            "budget", "affordable", "cheap", "price", "prices", "pricing",
            "discount", "discounts", "value",
        ],
        constraints: &[Constraint::MinPriceSensitivity(0.55)],
        strategy: "value_seeker",
    },
    ConceptGroup {
        tag: "emi_users",
        intent: IntentCategory::Budget,
        keywords: &["emi", "installment", "installments", "instalment", "instalments"],
        constraints: &[Constraint::UsesEmi],
        strategy: "value_seeker",
    },
    ConceptGroup {
        tag: "premium_buyers",
        intent: IntentCategory::Lifestyle,
        keywords: &["premium", "luxury", "high end", "flagship"],
        constraints: &[Constraint::IncomeIn(IncomeBand::High)],
        strategy: "premium_intent",
    },
    ConceptGroup {
        tag: "audio_interest",
        intent: IntentCategory::Interest,
        keywords: &["headphone", "headphones", "speaker", "speakers", "audio", "sound", "bose"],
        constraints: &[Constraint::MinBrandAwareness(0.6)],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "reach_goal",
        intent: IntentCategory::Reach,
        keywords: &["reach", "awareness", "visibility"],
        constraints: &[],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "convert_goal",
        intent: IntentCategory::Convert,
        keywords: &["convert", "conversion", "conversions", "sales", "purchase", "purchases", "adoption", "adopt"],
        constraints: &[],
        strategy: GENERIC_STRATEGY,
    },
    ConceptGroup {
        tag: "retain_goal",
        intent: IntentCategory::Retain,
        keywords: &["retain", "retention", "loyalty", "repeat"],
        constraints: &[],
        strategy: GENERIC_STRATEGY,
    },
];

/// Lowercased alphanumeric tokens of `text`. Hyphens and any other
/// punctuation act as separators, so "tier-2" and "tier 2" tokenize alike.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word match: the keyword's token sequence must appear as consecutive
/// tokens of the text. "emi" therefore never fires inside "premium", and
/// multi-word keywords like "tier 2" match across hyphens and spaces.
pub(crate) fn keyword_matches(tokens: &[String], keyword: &str) -> bool {
    let needle: Vec<&str> = keyword
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(t, k)| t == k))
}

/// Parse a goal string into a `GoalAnalysis`. Pure: same goal, same result.
pub fn analyze(goal: &str) -> GoalAnalysis {
    let tokens = tokenize(goal);

    let mut concepts = Vec::new();
    for group in CONCEPT_GROUPS {
        let matched: Vec<&'static str> = group
            .keywords
            .iter()
            .copied()
            .filter(|kw| keyword_matches(&tokens, kw))
            .collect();
        if matched.is_empty() {
            continue;
        }
        // Match strength normalized over the group's keyword list, lifted so
        // that any match lands clearly above the no-match floor.
        let ratio = matched.len() as f64 / group.keywords.len() as f64;
        let confidence = (0.5 + 0.5 * ratio).min(1.0);
        concepts.push(ConceptMatch {
            tag: group.tag,
            intent: group.intent,
            matched_keywords: matched,
            confidence,
        });
    }

    if concepts.is_empty() {
        return GoalAnalysis {
            goal: goal.to_string(),
            concepts,
            intent: IntentCategory::Reach,
            confidence: NO_MATCH_CONFIDENCE,
            constraints: Vec::new(),
            strategy: GENERIC_STRATEGY,
        };
    }

    // Intent: category with the highest accumulated keyword-match count;
    // ties resolved by table order (first concept hit wins).
    let mut intent = concepts[0].intent;
    let mut best_count = 0usize;
    for concept in &concepts {
        let count: usize = concepts
            .iter()
            .filter(|c| c.intent == concept.intent)
            .map(|c| c.matched_keywords.len())
            .sum();
        if count > best_count {
            best_count = count;
            intent = concept.intent;
        }
    }

    let confidence = concepts
        .iter()
        .filter(|c| c.intent == intent)
        .map(|c| c.confidence)
        .fold(0.0f64, f64::max);

    // Conjoin filter fragments; a same-field conflict keeps the fragment from
    // the higher-confidence concept.
    let mut constraints: Vec<FilterConstraint> = Vec::new();
    for concept in &concepts {
        let group = CONCEPT_GROUPS
            .iter()
            .find(|g| g.tag == concept.tag)
            .expect("concept tag comes from the table");
        for constraint in group.constraints {
            let key = constraint.field_key();
            match constraints
                .iter_mut()
                .find(|existing| existing.constraint.field_key() == key)
            {
                Some(existing) if existing.confidence < concept.confidence => {
                    *existing = FilterConstraint {
                        source_tag: concept.tag,
                        confidence: concept.confidence,
                        constraint: *constraint,
                    };
                }
                Some(_) => {}
                None => constraints.push(FilterConstraint {
                    source_tag: concept.tag,
                    confidence: concept.confidence,
                    constraint: *constraint,
                }),
            }
        }
    }

    // Feature strategy: the highest-confidence concept that prescribes one.
    let strategy = concepts
        .iter()
        .filter(|c| {
            CONCEPT_GROUPS
                .iter()
                .any(|g| g.tag == c.tag && g.strategy != GENERIC_STRATEGY)
        })
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .and_then(|c| {
            CONCEPT_GROUPS
                .iter()
                .find(|g| g.tag == c.tag)
                .map(|g| g.strategy)
        })
        .unwrap_or(GENERIC_STRATEGY);

    GoalAnalysis {
        goal: goal.to_string(),
        concepts,
        intent,
        confidence,
        constraints,
        strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_goal_beats_the_floor() {
        let analysis = analyze("reach college students with a new app");
        assert!(analysis.confidence > NO_MATCH_CONFIDENCE);
        assert!(!analysis.concepts.is_empty());
    }

    #[test]
    fn empty_goal_takes_the_generic_path() {
        let analysis = analyze("");
        assert_eq!(analysis.intent, IntentCategory::Reach);
        assert!((analysis.confidence - NO_MATCH_CONFIDENCE).abs() < 1e-12);
        assert!(analysis.constraints.is_empty());
        assert_eq!(analysis.strategy, GENERIC_STRATEGY);
    }

    #[test]
    fn gibberish_goal_takes_the_generic_path() {
        let analysis = analyze("zxqvbn wrfpl");
        assert_eq!(analysis.intent, IntentCategory::Reach);
        assert!((analysis.confidence - NO_MATCH_CONFIDENCE).abs() < 1e-12);
    }

    #[test]
    fn college_tier2_goal_yields_age_and_tier_constraints() {
        let analysis = analyze("college students in tier-2 cities");
        assert_eq!(analysis.intent, IntentCategory::Generation);
        assert_eq!(analysis.strategy, "youth_lifestyle");

        let keys: Vec<&str> = analysis
            .constraints
            .iter()
            .map(|c| c.constraint.field_key())
            .collect();
        assert!(keys.contains(&"age"));
        assert!(keys.contains(&"city_tier"));
    }

    #[test]
    fn same_field_conflict_keeps_higher_confidence_fragment() {
        // Two student keywords outrank the single "parent" hit on age.
        let analysis = analyze("college students whose parent pays");
        let age = analysis
            .constraints
            .iter()
            .find(|c| c.constraint.field_key() == "age")
            .unwrap();
        assert_eq!(age.constraint, Constraint::AgeBetween(18, 25));
        assert_eq!(age.source_tag, "students");
    }

    #[test]
    fn budget_goal_selects_value_seeker_strategy() {
        let analysis = analyze("budget buyers who want EMI plans");
        assert_eq!(analysis.intent, IntentCategory::Budget);
        assert_eq!(analysis.strategy, "value_seeker");
        assert!(analysis
            .constraints
            .iter()
            .any(|c| c.constraint == Constraint::UsesEmi));
    }

    #[test]
    fn keywords_only_match_whole_words() {
        let tokens = tokenize("premium headphones already advertised");
        assert!(!keyword_matches(&tokens, "emi"));
        assert!(!keyword_matches(&tokens, "ad"));
        assert!(keyword_matches(&tokens, "premium"));
        assert!(keyword_matches(&tokens, "headphones"));

        let tokens = tokenize("students in tier-2 cities");
        assert!(keyword_matches(&tokens, "tier 2"));
        assert!(!keyword_matches(&tokens, "tier 3"));
    }

    #[test]
    fn premium_goal_is_not_misread_as_emi_budget() {
        let analysis = analyze("premium headphones");
        assert_eq!(analysis.intent, IntentCategory::Lifestyle);
        assert_eq!(analysis.strategy, "premium_intent");
        assert!(analysis
            .constraints
            .iter()
            .all(|c| c.constraint != Constraint::UsesEmi));
        assert!(analysis.concepts.iter().all(|c| c.tag != "emi_users"));
    }

    #[test]
    fn analyze_is_deterministic() {
        let a = analyze("premium headphone adoption among tier-2 college students");
        let b = analyze("premium headphone adoption among tier-2 college students");
        assert_eq!(a.intent, b.intent);
        assert!((a.confidence - b.confidence).abs() < 1e-12);
        assert_eq!(a.constraints.len(), b.constraints.len());
        assert_eq!(a.strategy, b.strategy);
    }
}
