use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use persona_engine::config::EngineConfig;
use persona_engine::display;
use persona_engine::pipeline::PersonaEngine;
use persona_engine::population::Population;
use persona_engine::server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,persona_engine=debug")),
        )
        .init();

    let config = EngineConfig::load();

    let db_path = Path::new(&config.population_db_path);
    let population = if db_path.exists() {
        Population::load_sqlite(db_path)?
    } else {
        tracing::warn!(
            "Population database {:?} not found; synthesizing {} users (seed {})",
            db_path,
            config.synthetic_population_size,
            config.seed
        );
        Population::synthesize(config.synthetic_population_size, config.seed)
    };

    if population.is_empty() {
        anyhow::bail!("Population is empty; nothing to segment");
    }

    let engine = Arc::new(PersonaEngine::new(config, population));

    // Smoke-run the pipeline once before serving.
    let default_goal = engine.config().default_goal.clone();
    let smoke = engine.generate_clusters_default(&default_goal)?;
    tracing::debug!("Startup run:\n{}", display::render_summary(&smoke));

    server::serve(engine).await
}
