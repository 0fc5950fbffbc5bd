use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Optional generative backend (OpenAI-compatible: Ollama, LM Studio, vLLM,
/// OpenAI, etc.). When disabled or unreachable the conversation engine falls
/// back to its rule-based templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_llm_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    12
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_llm_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database with a `users` table. When the file is missing a
    /// synthetic population of `synthetic_population_size` users is used.
    #[serde(default = "default_population_db_path")]
    pub population_db_path: String,
    #[serde(default = "default_synthetic_population_size")]
    pub synthetic_population_size: usize,

    // Audience filtering
    #[serde(default = "default_min_subset_size")]
    pub min_subset_size: usize,
    #[serde(default = "default_max_subset_size")]
    pub max_subset_size: usize,

    // Clustering
    #[serde(default = "default_k_min")]
    pub default_k_min: usize,
    #[serde(default = "default_k_max")]
    pub default_k_max: usize,
    #[serde(default = "default_min_cluster_share")]
    pub default_min_cluster_share: f64,

    /// Seed for every stochastic step (fallback sampling, k-means init,
    /// synthetic population). Fixed seed, reproducible runs.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Goal assumed by the chat route when the caller omits one.
    #[serde(default = "default_goal")]
    pub default_goal: String,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_population_db_path() -> String {
    "data/users.db".to_string()
}

fn default_synthetic_population_size() -> usize {
    5_000
}

fn default_min_subset_size() -> usize {
    200
}

fn default_max_subset_size() -> usize {
    5_000
}

fn default_k_min() -> usize {
    2
}

fn default_k_max() -> usize {
    4
}

fn default_min_cluster_share() -> f64 {
    0.03
}

fn default_seed() -> u64 {
    42
}

fn default_goal() -> String {
    "college students".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            population_db_path: default_population_db_path(),
            synthetic_population_size: default_synthetic_population_size(),
            min_subset_size: default_min_subset_size(),
            max_subset_size: default_max_subset_size(),
            default_k_min: default_k_min(),
            default_k_max: default_k_max(),
            default_min_cluster_share: default_min_cluster_share(),
            seed: default_seed(),
            default_goal: default_goal(),
            llm: LlmConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (next to the executable).
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("persona_config.toml")
    }

    /// Load config from persona_config.toml, falling back to env vars + defaults.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<EngineConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Load from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("PERSONA_POPULATION_DB") {
            if !path.trim().is_empty() {
                config.population_db_path = path;
            }
        }

        if let Ok(n) = env::var("PERSONA_POPULATION_SIZE") {
            if let Ok(n) = n.parse() {
                config.synthetic_population_size = n;
            }
        }

        if let Ok(n) = env::var("PERSONA_MIN_SUBSET_SIZE") {
            if let Ok(n) = n.parse() {
                config.min_subset_size = n;
            }
        }

        if let Ok(seed) = env::var("PERSONA_SEED") {
            if let Ok(seed) = seed.parse() {
                config.seed = seed;
            }
        }

        if let Ok(goal) = env::var("PERSONA_DEFAULT_GOAL") {
            if !goal.trim().is_empty() {
                config.default_goal = goal;
            }
        }

        if let Ok(enabled) = env::var("PERSONA_LLM_ENABLED") {
            config.llm.enabled = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }

        if let Ok(url) = env::var("PERSONA_LLM_API_URL") {
            config.llm.api_url = url;
        }

        if let Ok(model) = env::var("PERSONA_LLM_MODEL") {
            config.llm.model = model;
        }

        if let Ok(key) = env::var("PERSONA_LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        if let Ok(secs) = env::var("PERSONA_LLM_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.llm.timeout_secs = secs;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_expectations() {
        let config = EngineConfig::default();
        assert_eq!(config.min_subset_size, 200);
        assert_eq!(config.default_k_min, 2);
        assert_eq!(config.default_k_max, 4);
        assert!((config.default_min_cluster_share - 0.03).abs() < 1e-12);
        assert!(!config.llm.enabled);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            seed = 7
            [llm]
            enabled = true
            model = "qwen2.5"
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 7);
        assert!(config.llm.enabled);
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.llm.timeout_secs, 12);
        assert_eq!(config.min_subset_size, 200);
    }
}
