use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint grid {found:?} does not match the simulation grid {expected:?}")]
    DimensionMismatch { expected: [i64; 3], found: [i64; 3] },

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("Field record CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Field record for id {expected} was restored as id {found}")]
    RegistryMismatch { expected: u64, found: u64 },
}
