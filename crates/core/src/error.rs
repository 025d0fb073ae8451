//! Error taxonomy shared by the evaluation core.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Zone or threshold data rejected at load time.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A single sample that cannot be evaluated. Recovered by the caller.
    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    /// A configuration value outside its permitted range.
    #[error("Validation failed: {0}")]
    Validation(String),
}
