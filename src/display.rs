//! Compact presentation projections of pipeline output.

use serde::Serialize;

use crate::pipeline::label::ClusterProfile;
use crate::pipeline::persona::{self, Persona};
use crate::pipeline::GenerationResult;

/// One cluster condensed for list views.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterCard {
    pub cluster_id: usize,
    pub label: String,
    pub icon: String,
    pub headline: String,
    pub description: String,
    pub traits: Vec<String>,
    pub size: usize,
    pub share_pct: f64,
    pub engagement_score: f64,
    pub personas_count: usize,
}

impl ClusterCard {
    pub fn from_profile(profile: &ClusterProfile) -> Self {
        let demo = &profile.demographics;
        let headline = format!(
            "{} users, avg age {:.0}, mostly {} / {} income, reachable via {}",
            profile.size,
            demo.mean_age,
            demo.dominant_city_tier,
            demo.dominant_income_band,
            demo.top_media_channel
        );
        Self {
            cluster_id: profile.cluster_id,
            label: profile.label.clone(),
            icon: profile.icon.clone(),
            headline,
            description: profile.description.clone(),
            traits: profile.traits.clone(),
            size: profile.size,
            share_pct: profile.share * 100.0,
            engagement_score: profile.engagement_score,
            personas_count: persona::persona_count(profile.size),
        }
    }
}

pub fn cluster_cards(profiles: &[ClusterProfile]) -> Vec<ClusterCard> {
    profiles.iter().map(ClusterCard::from_profile).collect()
}

pub fn persona_cards(personas: &[Persona]) -> Vec<PersonaCard> {
    personas.iter().map(PersonaCard::from_persona).collect()
}

/// One persona condensed for list views and chat headers.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaCard {
    pub id: String,
    pub name: String,
    pub tagline: String,
    pub cares_about: [String; 2],
    pub barrier: String,
}

impl PersonaCard {
    pub fn from_persona(persona: &Persona) -> Self {
        let tagline = format!(
            "{}, {} from a {} city ({} income)",
            persona.age, persona.occupation, persona.city_tier, persona.income_band
        );
        Self {
            id: persona.id.clone(),
            name: persona.name.clone(),
            tagline,
            cares_about: persona.cares_about.clone(),
            barrier: persona.barrier.clone(),
        }
    }
}

/// Terminal summary of one generation run, for the startup smoke log.
pub fn render_summary(result: &GenerationResult) -> String {
    let mut out = format!(
        "goal: {}\nintent: {} (confidence {:.2})\nsubset: {} users\nk: {} (silhouette {:.3}{})\n",
        result.analysis.goal,
        result.analysis.intent.as_str(),
        result.analysis.confidence,
        result.subset_size,
        result.k,
        result.quality,
        if result.degenerate { ", degenerate" } else { "" }
    );
    for profile in &result.clusters {
        let card = ClusterCard::from_profile(profile);
        out.push_str(&format!(
            "  [{}] {} {} ({} users, {:.1}%)\n",
            card.cluster_id, card.icon, card.label, card.size, card.share_pct
        ));
    }
    out
}
