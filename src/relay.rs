//! Relay/sponsor submission with idempotent retry.
//!
//! The relay pays the network fee and deduplicates submissions by request
//! id, which is what makes the bounded retry loop safe: resubmitting the
//! same signed payload after a transient failure has at most one on-chain
//! effect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::types::{RequestId, SignedTransfer};

/// Finality state reported by the relay for a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Rejected { reason: String },
}

/// Fee-sponsoring relay service.
#[async_trait]
pub trait RelayService: Send + Sync {
    /// Submit a signed payload. The relay deduplicates by `idempotency_key`;
    /// repeat calls with the same key return the original signature.
    async fn submit_transaction(
        &self,
        payload: &SignedTransfer,
        idempotency_key: &RequestId,
    ) -> Result<String, RelayError>;

    /// Query finality of a previously submitted transaction.
    async fn get_transaction_status(&self, signature: &str) -> Result<TransactionStatus, RelayError>;
}

/// Submission client with bounded exponential backoff.
#[derive(Clone)]
pub struct RelayClient {
    service: Arc<dyn RelayService>,
    config: RelayConfig,
}

impl RelayClient {
    pub fn new(service: Arc<dyn RelayService>, config: RelayConfig) -> Self {
        Self { service, config }
    }

    /// Submit `payload`, retrying transient failures up to the configured
    /// bound. Rejections are surfaced immediately and never retried.
    /// Cancellation aborts between attempts and during backoff.
    pub async fn submit(
        &self,
        payload: &SignedTransfer,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<String, RelayError> {
        let request_id = payload.instruction.request_id.clone();
        let mut attempt: u32 = 0;

        loop {
            if *cancel.borrow() {
                return Err(RelayError::Cancelled);
            }

            attempt += 1;
            match self
                .service
                .submit_transaction(payload, &request_id)
                .await
            {
                Ok(signature) => {
                    debug!(request_id = %request_id, %signature, attempt, "relay accepted submission");
                    return Ok(signature);
                }
                Err(RelayError::Transient(message)) => {
                    if attempt >= self.config.max_retries {
                        warn!(request_id = %request_id, attempt, "relay retries exhausted: {message}");
                        return Err(RelayError::Transient(message));
                    }
                    let backoff = self.config.backoff_for_attempt(attempt - 1);
                    warn!(
                        request_id = %request_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient relay failure, backing off: {message}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.changed() => return Err(RelayError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Poll the relay until the transaction reaches finality.
    pub async fn await_finality(
        &self,
        signature: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<TransactionStatus, RelayError> {
        let deadline = Instant::now() + self.config.confirm_timeout();

        loop {
            if *cancel.borrow() {
                return Err(RelayError::Cancelled);
            }

            match self.service.get_transaction_status(signature).await {
                Ok(TransactionStatus::Confirmed) => {
                    debug!(%signature, "transaction confirmed");
                    return Ok(TransactionStatus::Confirmed);
                }
                Ok(TransactionStatus::Rejected { reason }) => {
                    return Err(RelayError::Rejected(reason));
                }
                Ok(TransactionStatus::Pending) => {}
                Err(RelayError::Transient(message)) => {
                    warn!(%signature, "status poll failed: {message}");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(RelayError::Transient(
                    "timed out waiting for finality".to_string(),
                ));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.confirm_poll_interval()) => {}
                _ = cancel.changed() => return Err(RelayError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::types::{TransferInstruction, WalletAddress};

    struct ScriptedRelay {
        submissions: AtomicU32,
        /// Outcomes per attempt; the last entry repeats.
        script: Mutex<Vec<Result<String, RelayError>>>,
    }

    impl ScriptedRelay {
        fn new(script: Vec<Result<String, RelayError>>) -> Arc<Self> {
            Arc::new(Self {
                submissions: AtomicU32::new(0),
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl RelayService for ScriptedRelay {
        async fn submit_transaction(
            &self,
            _payload: &SignedTransfer,
            _idempotency_key: &RequestId,
        ) -> Result<String, RelayError> {
            let attempt = self.submissions.fetch_add(1, Ordering::SeqCst) as usize;
            let script = self.script.lock().unwrap();
            script[attempt.min(script.len() - 1)].clone()
        }

        async fn get_transaction_status(
            &self,
            _signature: &str,
        ) -> Result<TransactionStatus, RelayError> {
            Ok(TransactionStatus::Confirmed)
        }
    }

    fn signed_transfer() -> SignedTransfer {
        SignedTransfer {
            instruction: TransferInstruction {
                from: WalletAddress::from_bytes(&[1u8; 32]),
                to: WalletAddress::from_bytes(&[2u8; 32]),
                lamports: 42,
                request_id: RequestId::from("tx-retry"),
            },
            signature: vec![0xab; 64],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let relay = ScriptedRelay::new(vec![
            Err(RelayError::Transient("blip".into())),
            Err(RelayError::Transient("blip".into())),
            Ok("sig-1".to_string()),
        ]);
        let client = RelayClient::new(relay.clone(), RelayConfig::default());
        let (_tx, mut cancel) = watch::channel(false);

        let signature = client.submit(&signed_transfer(), &mut cancel).await.unwrap();
        assert_eq!(signature, "sig-1");
        assert_eq!(relay.submissions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::Transient("down".into()))]);
        let client = RelayClient::new(relay.clone(), RelayConfig::default());
        let (_tx, mut cancel) = watch::channel(false);

        let err = client.submit(&signed_transfer(), &mut cancel).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(relay.submissions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::Rejected("bad nonce".into()))]);
        let client = RelayClient::new(relay.clone(), RelayConfig::default());
        let (_tx, mut cancel) = watch::channel(false);

        let err = client.submit(&signed_transfer(), &mut cancel).await.unwrap_err();
        assert_eq!(err, RelayError::Rejected("bad nonce".into()));
        assert_eq!(relay.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let relay = ScriptedRelay::new(vec![Err(RelayError::Transient("down".into()))]);
        let client = RelayClient::new(
            relay.clone(),
            RelayConfig {
                max_retries: 10,
                backoff_base_ms: 60_000,
                ..RelayConfig::default()
            },
        );
        let (tx, mut cancel) = watch::channel(false);

        let transfer = signed_transfer();
        let submit = client.submit(&transfer, &mut cancel);
        tokio::pin!(submit);

        // Let the first attempt fail and enter backoff, then cancel.
        tokio::select! {
            _ = &mut submit => panic!("should still be backing off"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
        }
        tx.send(true).unwrap();

        let err = submit.await.unwrap_err();
        assert_eq!(err, RelayError::Cancelled);
        assert_eq!(relay.submissions.load(Ordering::SeqCst), 1);
    }
}
