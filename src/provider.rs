//! Identity provider boundary and the credential authenticator.
//!
//! The provider owns the passkey challenge/response protocol and the
//! user-present prompts (authentication and signing). The authenticator
//! drives the protocol with timeouts and cancellation; a cancelled or
//! timed-out challenge is always aborted provider-side so no server-side
//! challenge is left dangling.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{AuthError, SigningError};
use crate::types::{Assertion, Challenge, Credential};

/// Passkey-capable identity provider.
///
/// Implementations must be stable: the same physical passkey always yields
/// the same `Credential::id`, and `begin_challenge` is safe to retry.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Open a new authentication challenge.
    async fn begin_challenge(&self) -> Result<Challenge, AuthError>;

    /// Prompt the user's passkey to sign the challenge nonce.
    ///
    /// This is the user-present interaction; it suspends until the user
    /// responds or the platform gives up.
    async fn request_assertion(&self, challenge: &Challenge) -> Result<Assertion, AuthError>;

    /// Verify the assertion and issue the credential.
    async fn complete_challenge(
        &self,
        challenge: &Challenge,
        assertion: Assertion,
    ) -> Result<Credential, AuthError>;

    /// Abort an open challenge so the provider can discard it.
    async fn abort_challenge(&self, challenge: &Challenge);

    /// Obtain a credential-bound signature over an arbitrary payload.
    ///
    /// Prompts for user presence, like `request_assertion`.
    async fn sign_payload(
        &self,
        credential: &Credential,
        payload: &[u8],
    ) -> Result<Vec<u8>, SigningError>;
}

/// Drives the challenge/response flow against an [`IdentityProvider`].
#[derive(Clone)]
pub struct CredentialAuthenticator {
    provider: Arc<dyn IdentityProvider>,
    config: ProviderConfig,
}

impl CredentialAuthenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>, config: ProviderConfig) -> Self {
        Self { provider, config }
    }

    /// Run one full authentication: begin, assert, complete.
    ///
    /// `cancel` flipping to `true` aborts the in-flight challenge and
    /// surfaces [`AuthError::Cancelled`]. Provider calls that outlive the
    /// configured timeout abort the challenge and surface
    /// [`AuthError::ProviderUnreachable`].
    pub async fn authenticate(
        &self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Credential, AuthError> {
        if *cancel.borrow() {
            return Err(AuthError::Cancelled);
        }

        let challenge = self
            .bounded(cancel, None, self.provider.begin_challenge())
            .await?;
        debug!(
            challenge_id = %challenge.id,
            nonce = %hex::encode(challenge.nonce),
            "challenge opened"
        );

        let assertion = self
            .bounded(
                cancel,
                Some(&challenge),
                self.provider.request_assertion(&challenge),
            )
            .await?;

        let credential = self
            .bounded(
                cancel,
                Some(&challenge),
                self.provider.complete_challenge(&challenge, assertion),
            )
            .await?;

        debug!(credential_id = %credential.id, "authentication complete");
        Ok(credential)
    }

    /// Await a provider call under the timeout and cancellation signal,
    /// aborting `challenge` (when open) on either.
    async fn bounded<T>(
        &self,
        cancel: &mut watch::Receiver<bool>,
        challenge: Option<&Challenge>,
        call: impl std::future::Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.config.timeout(), call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AuthError::ProviderUnreachable(
                    "provider call timed out".to_string(),
                )),
            },
            _ = cancel.changed() => Err(AuthError::Cancelled),
        };

        if outcome.is_err() {
            if let Some(challenge) = challenge {
                warn!(challenge_id = %challenge.id, "aborting challenge");
                self.provider.abort_challenge(challenge).await;
            }
        }
        outcome
    }

    /// Credential-bound signing capability, passed through to the provider.
    pub async fn sign(
        &self,
        credential: &Credential,
        payload: &[u8],
    ) -> Result<Vec<u8>, SigningError> {
        self.provider.sign_payload(credential, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        aborted: AtomicUsize,
        decline_assertion: bool,
        hang_assertion: bool,
    }

    #[async_trait]
    impl IdentityProvider for StubProvider {
        async fn begin_challenge(&self) -> Result<Challenge, AuthError> {
            Ok(Challenge::random("ch-1"))
        }

        async fn request_assertion(&self, challenge: &Challenge) -> Result<Assertion, AuthError> {
            if self.hang_assertion {
                std::future::pending::<()>().await;
            }
            if self.decline_assertion {
                return Err(AuthError::Declined);
            }
            Ok(Assertion {
                credential_id: "cred-1".to_string(),
                signature: challenge.nonce.to_vec(),
            })
        }

        async fn complete_challenge(
            &self,
            _challenge: &Challenge,
            assertion: Assertion,
        ) -> Result<Credential, AuthError> {
            Ok(Credential::new(assertion.credential_id))
        }

        async fn abort_challenge(&self, _challenge: &Challenge) {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }

        async fn sign_payload(
            &self,
            _credential: &Credential,
            payload: &[u8],
        ) -> Result<Vec<u8>, SigningError> {
            Ok(payload.to_vec())
        }
    }

    fn authenticator(decline: bool) -> (CredentialAuthenticator, Arc<StubProvider>) {
        let provider = Arc::new(StubProvider {
            aborted: AtomicUsize::new(0),
            decline_assertion: decline,
            hang_assertion: false,
        });
        (
            CredentialAuthenticator::new(provider.clone(), ProviderConfig::default()),
            provider,
        )
    }

    #[tokio::test]
    async fn test_authenticate_yields_stable_credential() {
        let (auth, _) = authenticator(false);
        let (_tx, mut cancel) = watch::channel(false);

        let first = auth.authenticate(&mut cancel).await.unwrap();
        let second = auth.authenticate(&mut cancel).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_declined_assertion_aborts_challenge() {
        let (auth, provider) = authenticator(true);
        let (_tx, mut cancel) = watch::channel(false);

        let err = auth.authenticate(&mut cancel).await.unwrap_err();
        assert_eq!(err, AuthError::Declined);
        assert_eq!(provider.aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_provider_times_out_and_aborts() {
        let provider = Arc::new(StubProvider {
            aborted: AtomicUsize::new(0),
            decline_assertion: false,
            hang_assertion: true,
        });
        let auth = CredentialAuthenticator::new(
            provider.clone(),
            ProviderConfig { timeout_secs: 1 },
        );
        let (_tx, mut cancel) = watch::channel(false);

        let err = auth.authenticate(&mut cancel).await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderUnreachable(_)));
        assert_eq!(provider.aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_login_never_opens_challenge() {
        let (auth, provider) = authenticator(false);
        let (tx, mut cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let err = auth.authenticate(&mut cancel).await.unwrap_err();
        assert_eq!(err, AuthError::Cancelled);
        assert_eq!(provider.aborted.load(Ordering::SeqCst), 0);
    }
}
