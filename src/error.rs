//! Caller-facing error taxonomy.
//!
//! Only input problems propagate out of the pipeline (bad goal parameters,
//! out-of-range k bounds, unknown ids). Thin subsets, degenerate clusterings
//! and backend failures are all recovered internally and never appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid k range: k_min={k_min}, k_max={k_max} (need 2 <= k_min <= k_max)")]
    InvalidKRange { k_min: usize, k_max: usize },

    #[error("min_cluster_pct {0} out of range (expected 0.0..=0.5)")]
    InvalidMinClusterPct(f64),

    #[error("unknown cluster id {cluster_id} (clustering produced {available} clusters)")]
    UnknownCluster { cluster_id: usize, available: usize },

    #[error("invalid persona id '{0}' (expected dyn_<cluster>_<index>)")]
    InvalidPersonaId(String),

    #[error("unknown persona id '{0}'")]
    UnknownPersona(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_values() {
        let err = InputError::InvalidKRange { k_min: 5, k_max: 2 };
        assert!(err.to_string().contains("k_min=5"));

        let err = InputError::InvalidPersonaId("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }
}
