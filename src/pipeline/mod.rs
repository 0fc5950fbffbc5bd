//! The goal-to-persona pipeline.
//!
//! Stages run in a fixed order: goal analysis, audience selection, feature
//! engineering, clustering, labeling, persona synthesis. `PersonaEngine` is
//! the single entry point and owns the population snapshot, so one instance
//! serves all requests.

pub mod audience;
pub mod chat;
pub mod cluster;
pub mod features;
pub mod goal;
pub mod label;
pub mod persona;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::InputError;
use crate::llm_client::LlmClient;
use crate::population::Population;

use audience::{AudienceSubset, SamplingMethod};
use chat::{ChatReply, ChatTurn, ConversationEngine, LlmBackend};
use cluster::ClusterAssignment;
use goal::GoalAnalysis;
use label::ClusterProfile;
use persona::Persona;

/// Everything one clustering run produced, ready for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub generated_at: DateTime<Utc>,
    pub analysis: GoalAnalysis,
    pub subset_size: usize,
    pub sampling_method: SamplingMethod,
    /// True when the filtered audience exceeded the cap and was sampled down.
    pub subset_downsampled: bool,
    pub filters_applied: Vec<String>,
    pub k: usize,
    pub quality: f64,
    pub degenerate: bool,
    pub clusters: Vec<ClusterProfile>,
}

/// A chat exchange plus the updated transcript the caller should keep.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub persona: Persona,
    pub reply: ChatReply,
    pub history: Vec<ChatTurn>,
}

pub struct PersonaEngine {
    config: EngineConfig,
    population: Population,
    conversation: ConversationEngine,
}

impl PersonaEngine {
    pub fn new(config: EngineConfig, population: Population) -> Self {
        let conversation = if config.llm.enabled {
            tracing::info!(
                "Generative backend enabled: {} at {}",
                config.llm.model,
                config.llm.api_url
            );
            ConversationEngine::with_backend(Box::new(LlmBackend::new(
                LlmClient::new(&config.llm),
                Duration::from_secs(config.llm.timeout_secs),
            )))
        } else {
            ConversationEngine::rule_based_only()
        };
        Self {
            config,
            population,
            conversation,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Analyze a goal without running the rest of the pipeline.
    pub fn analyze_goal(&self, goal_text: &str) -> GoalAnalysis {
        goal::analyze(goal_text)
    }

    /// Run the full pipeline for a goal with explicit clustering parameters.
    pub fn generate_clusters(
        &self,
        goal_text: &str,
        k_min: usize,
        k_max: usize,
        min_cluster_share: f64,
    ) -> Result<GenerationResult, InputError> {
        if k_min < 2 || k_min > k_max {
            return Err(InputError::InvalidKRange { k_min, k_max });
        }
        if !(0.0..=0.5).contains(&min_cluster_share) {
            return Err(InputError::InvalidMinClusterPct(min_cluster_share));
        }

        let analysis = goal::analyze(goal_text);
        tracing::info!(
            "Goal '{}' -> intent {} (confidence {:.2}), {} constraints",
            goal_text,
            analysis.intent.as_str(),
            analysis.confidence,
            analysis.constraints.len()
        );

        let (subset, assignment) = self.segment(&analysis, k_min, k_max, min_cluster_share);
        let clusters = label::summarize(&self.population, &subset, &assignment, analysis.intent);
        tracing::info!(
            "Clustered {} users into k={} (silhouette {:.3})",
            subset.len(),
            assignment.k,
            assignment.quality
        );

        Ok(GenerationResult {
            generated_at: Utc::now(),
            subset_size: subset.len(),
            sampling_method: subset.method,
            subset_downsampled: subset.downsampled,
            filters_applied: subset.filters_applied,
            k: assignment.k,
            quality: assignment.quality,
            degenerate: assignment.degenerate,
            clusters,
            analysis,
        })
    }

    /// Run the pipeline with the configured defaults.
    pub fn generate_clusters_default(
        &self,
        goal_text: &str,
    ) -> Result<GenerationResult, InputError> {
        self.generate_clusters(
            goal_text,
            self.config.default_k_min,
            self.config.default_k_max,
            self.config.default_min_cluster_share,
        )
    }

    /// Personas for one cluster of the default-parameter run for `goal_text`.
    /// Deterministic: the same goal and cluster id always yield the same
    /// people.
    pub fn generate_personas(
        &self,
        goal_text: &str,
        cluster_id: usize,
    ) -> Result<Vec<Persona>, InputError> {
        let result = self.generate_clusters_default(goal_text)?;
        let profile = result
            .clusters
            .iter()
            .find(|p| p.cluster_id == cluster_id)
            .ok_or(InputError::UnknownCluster {
                cluster_id,
                available: result.k,
            })?;
        Ok(persona::synthesize(goal_text, profile))
    }

    /// Chat with a persona identified by id, carrying the prior transcript.
    pub async fn chat(
        &self,
        persona_id: &str,
        goal_text: &str,
        history: Vec<ChatTurn>,
        message: &str,
    ) -> Result<ChatOutcome, InputError> {
        let (cluster_id, slot) = persona::parse_persona_id(persona_id)
            .ok_or_else(|| InputError::InvalidPersonaId(persona_id.to_string()))?;

        let personas = self.generate_personas(goal_text, cluster_id)?;
        let persona = personas
            .into_iter()
            .nth(slot)
            .ok_or_else(|| InputError::UnknownPersona(persona_id.to_string()))?;

        let mut history = history;
        let reply = self
            .conversation
            .respond(&persona, goal_text, &mut history, message)
            .await;

        Ok(ChatOutcome {
            persona,
            reply,
            history,
        })
    }

    fn segment(
        &self,
        analysis: &GoalAnalysis,
        k_min: usize,
        k_max: usize,
        min_cluster_share: f64,
    ) -> (AudienceSubset, ClusterAssignment) {
        let subset = audience::select(
            &self.population,
            analysis,
            self.config.min_subset_size,
            self.config.max_subset_size,
            self.config.seed,
        );
        let matrix = features::build(&self.population, &subset, analysis.strategy);
        let assignment = cluster::run(&matrix, k_min, k_max, min_cluster_share, self.config.seed);
        (subset, assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PersonaEngine {
        let config = EngineConfig::default();
        let population = Population::synthesize(1_500, config.seed);
        PersonaEngine::new(config, population)
    }

    #[test]
    fn rejects_invalid_k_range() {
        let engine = engine();
        assert!(matches!(
            engine.generate_clusters("college students", 1, 4, 0.03),
            Err(InputError::InvalidKRange { .. })
        ));
        assert!(matches!(
            engine.generate_clusters("college students", 4, 2, 0.03),
            Err(InputError::InvalidKRange { .. })
        ));
    }

    #[test]
    fn rejects_invalid_min_cluster_share() {
        let engine = engine();
        assert!(matches!(
            engine.generate_clusters("college students", 2, 4, 0.6),
            Err(InputError::InvalidMinClusterPct(_))
        ));
        assert!(matches!(
            engine.generate_clusters("college students", 2, 4, -0.1),
            Err(InputError::InvalidMinClusterPct(_))
        ));
    }

    #[test]
    fn empty_goal_still_produces_clusters() {
        let engine = engine();
        let result = engine.generate_clusters_default("").unwrap();
        assert_eq!(result.sampling_method, SamplingMethod::RandomFallback);
        assert!(result.k >= 2 || result.degenerate);
        assert!(!result.clusters.is_empty());
    }

    #[test]
    fn full_run_is_deterministic() {
        let engine = engine();
        let a = engine.generate_clusters_default("college students").unwrap();
        let b = engine.generate_clusters_default("college students").unwrap();
        assert_eq!(a.k, b.k);
        assert_eq!(a.subset_size, b.subset_size);
        assert!((a.quality - b.quality).abs() < 1e-12);
        let labels_a: Vec<&str> = a.clusters.iter().map(|c| c.label.as_str()).collect();
        let labels_b: Vec<&str> = b.clusters.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels_a, labels_b);
    }

    #[test]
    fn tier2_college_goal_end_to_end() {
        let engine = engine();
        let goal_text = "college students in tier-2 cities";
        let result = engine.generate_clusters(goal_text, 2, 4, 0.03).unwrap();

        assert!((2..=4).contains(&result.k) || result.degenerate);
        let total_share: f64 = result.clusters.iter().map(|c| c.share).sum();
        assert!((total_share - 1.0).abs() < 1e-6);
        if !result.degenerate {
            for cluster in &result.clusters {
                assert!(cluster.share >= 0.03);
            }
        }

        let cluster_id = result.clusters[0].cluster_id;
        let personas = engine.generate_personas(goal_text, cluster_id).unwrap();
        assert!((2..=3).contains(&personas.len()));
        for (slot, persona) in personas.iter().enumerate() {
            assert_eq!(persona.id, format!("dyn_{}_{}", cluster_id, slot));
            assert!(persona.personality.contains(&persona.city_tier));
            assert!(persona
                .personality
                .contains(&persona.income_band.to_lowercase()));
        }
    }

    #[test]
    fn unknown_cluster_reports_available_count() {
        let engine = engine();
        let err = engine.generate_personas("college students", 99).unwrap_err();
        match err {
            InputError::UnknownCluster {
                cluster_id,
                available,
            } => {
                assert_eq!(cluster_id, 99);
                assert!(available >= 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn chat_round_trip_updates_history() {
        let engine = engine();
        let result = engine.generate_clusters_default("budget buyers").unwrap();
        let cluster_id = result.clusters[0].cluster_id;
        let personas = engine.generate_personas("budget buyers", cluster_id).unwrap();

        let outcome = engine
            .chat(
                &personas[0].id,
                "budget buyers",
                Vec::new(),
                "What do you think about the price?",
            )
            .await
            .unwrap();
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.persona.id, personas[0].id);
        assert!(!outcome.reply.text.is_empty());
    }

    #[tokio::test]
    async fn chat_rejects_malformed_and_unknown_ids() {
        let engine = engine();
        assert!(matches!(
            engine.chat("nope", "budget buyers", Vec::new(), "hi").await,
            Err(InputError::InvalidPersonaId(_))
        ));
        assert!(matches!(
            engine.chat("dyn_0_9", "budget buyers", Vec::new(), "hi").await,
            Err(InputError::UnknownPersona(_))
        ));
    }
}
