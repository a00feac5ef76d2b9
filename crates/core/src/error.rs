/// Domain-level errors raised by the pure request checks in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The request violates a shape or frame-budget rule.
    #[error("Validation failed: {0}")]
    Validation(String),
}
