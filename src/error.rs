/// Error type for this crate.
///
/// Stage failures are never wrapped in this type; they reach the caller as the
/// stage's own error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateComplianceError {
    /// Invalid cooldown delay.
    #[error("invalid cooldown delay: {0}")]
    InvalidCooldownMs(String),
}
