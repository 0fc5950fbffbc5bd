//! Goal-driven audience segmentation and persona simulation.
//!
//! A free-text marketing goal is analyzed into a structured intent, the user
//! population is filtered and clustered around it, and each cluster yields a
//! handful of named personas that can be interviewed in character.

pub mod config;
pub mod display;
pub mod error;
pub mod llm_client;
pub mod pipeline;
pub mod population;
pub mod server;
