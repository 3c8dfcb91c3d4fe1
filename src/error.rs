//! Error types for the wallet core.
//!
//! Each component has its own error enum; `WalletError` aggregates them at
//! the caller-facing surface. Every terminal transfer failure carries the
//! originating error kind, and nothing in the core panics.

use thiserror::Error;

/// Authentication failures from the credential challenge flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The provider rejected or could not verify the challenge response.
    #[error("challenge failed: {0}")]
    ChallengeFailed(String),

    /// The user declined the passkey prompt.
    #[error("user declined authentication")]
    Declined,

    /// The identity provider could not be reached in time.
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The challenge was cancelled before completion.
    #[error("authentication cancelled")]
    Cancelled,
}

/// Smart-wallet address resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("address derivation failed: {0}")]
    DerivationFailed(String),

    /// The ledger could not supply the program configuration.
    #[error("program config unavailable: {0}")]
    ConfigUnavailable(String),
}

/// Transfer request validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds: requested {requested} lamports, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },
}

/// Signing failures from the credential-bound signer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// The user declined the signing prompt.
    #[error("signing declined")]
    Declined,

    /// The credential is no longer accepted by the provider.
    #[error("credential revoked: {0}")]
    CredentialRevoked(String),
}

/// Relay submission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Retryable failure (network blip, relay overloaded).
    #[error("transient relay error: {0}")]
    Transient(String),

    /// Permanent rejection; the same signed payload must not be resubmitted.
    #[error("relay rejected submission: {0}")]
    Rejected(String),

    /// The caller cancelled while a submission or retry was pending.
    #[error("relay submission cancelled")]
    Cancelled,
}

impl RelayError {
    /// Whether another attempt with the same idempotency key is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Transient(_))
    }
}

/// Session lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session is already active; callers must logout first.
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// No active session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session ended while an operation was in flight.
    #[error("session ended")]
    SessionEnded,
}

/// Aggregated error type for the wallet core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A transfer is already in flight for this session.
    #[error("transfer already in progress")]
    TransferInProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_retryability() {
        assert!(RelayError::Transient("timeout".into()).is_retryable());
        assert!(!RelayError::Rejected("bad nonce".into()).is_retryable());
        assert!(!RelayError::Cancelled.is_retryable());
    }

    #[test]
    fn test_errors_aggregate() {
        let err: WalletError = SessionError::AlreadyAuthenticated.into();
        assert_eq!(err, WalletError::Session(SessionError::AlreadyAuthenticated));
    }
}
