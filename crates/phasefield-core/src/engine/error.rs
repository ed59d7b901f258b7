use thiserror::Error;

use super::config::ConfigError;
use crate::core::io::error::CheckpointError;
use crate::core::params::ParamLoadError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Parameter file error: {source}")]
    Parameters {
        #[from]
        source: ParamLoadError,
    },

    #[error("Checkpoint error: {source}")]
    Checkpoint {
        #[from]
        source: CheckpointError,
    },

    #[error("Field {raw_id} is not registered")]
    FieldNotFound { raw_id: u64 },

    #[error("Phase index {phase} is out of range for {n_phases} phases")]
    InvalidPhase { phase: usize, n_phases: usize },

    #[error("Numerical failure in '{stage}': {reason}")]
    Numerical { stage: &'static str, reason: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
