//! Transfer pipeline: validate, sign, submit, confirm.
//!
//! Each transfer is tracked by a [`TransactionRecord`] moving through
//! `Draft → Validated → Signed → Submitted → Confirmed | Failed`.
//! Terminal records are never mutated again. At most one transfer may be
//! non-terminal per session; further requests are refused outright rather
//! than racing the same advisory balance check.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::balance::BalanceSync;
use crate::error::{RelayError, SessionError, ValidationError, WalletError};
use crate::provider::CredentialAuthenticator;
use crate::relay::{RelayClient, TransactionStatus};
use crate::types::{Credential, RequestId, SignedTransfer, TransferInstruction, WalletAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSACTION RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of one transfer submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Validated,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl TransferStatus {
    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Confirmed | TransferStatus::Failed)
    }
}

/// A user-initiated transfer request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Recipient address text; validated before anything is signed.
    pub recipient: String,
    /// Amount in lamports.
    pub lamports: u64,
    /// Idempotency key, stable across retries of this attempt.
    pub request_id: RequestId,
}

/// Tracked state of one submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub request_id: RequestId,
    pub status: TransferStatus,
    /// Ledger signature, present once the relay accepts the submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Originating error, present once the record fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionRecord {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            status: TransferStatus::Draft,
            signature: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `status`. Refused once terminal.
    pub(crate) fn advance(&mut self, status: TransferStatus) {
        if self.is_terminal() {
            warn!(request_id = %self.request_id, ?status, "ignoring transition on terminal record");
            return;
        }
        debug!(request_id = %self.request_id, from = ?self.status, to = ?status, "transfer transition");
        self.status = status;
    }

    /// Fail with the originating error. Refused once terminal.
    pub(crate) fn fail(&mut self, error: &WalletError) {
        if self.is_terminal() {
            return;
        }
        self.error = Some(error.to_string());
        self.advance(TransferStatus::Failed);
    }
}

/// Observable handle for one transfer.
///
/// Status updates stream through a watch channel; the current record is
/// always available without awaiting.
#[derive(Clone, Debug)]
pub struct TransferHandle {
    rx: watch::Receiver<TransactionRecord>,
}

impl TransferHandle {
    pub fn record(&self) -> TransactionRecord {
        self.rx.borrow().clone()
    }

    pub fn request_id(&self) -> RequestId {
        self.rx.borrow().request_id.clone()
    }

    /// Subscribe to the record's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TransactionRecord> {
        self.rx.clone()
    }

    /// Wait until the record reaches `Confirmed` or `Failed`.
    pub async fn wait_terminal(&self) -> TransactionRecord {
        let mut rx = self.rx.clone();
        loop {
            {
                let record = rx.borrow();
                if record.is_terminal() {
                    return record.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

struct CurrentTransfer {
    record_tx: Arc<watch::Sender<TransactionRecord>>,
    task: Option<JoinHandle<()>>,
}

/// Builds, signs, submits, and reconciles transfers for one session.
pub struct TransferPipeline {
    authenticator: CredentialAuthenticator,
    relay: RelayClient,
    balance: Arc<BalanceSync>,
    credential: Credential,
    address: WalletAddress,
    cancel_rx: watch::Receiver<bool>,
    current: Mutex<Option<CurrentTransfer>>,
}

impl TransferPipeline {
    pub fn new(
        authenticator: CredentialAuthenticator,
        relay: RelayClient,
        balance: Arc<BalanceSync>,
        credential: Credential,
        address: WalletAddress,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            authenticator,
            relay,
            balance,
            credential,
            address,
            cancel_rx,
            current: Mutex::new(None),
        }
    }

    /// Latest record for this session, terminal or not.
    pub fn current_record(&self) -> Option<TransactionRecord> {
        let Ok(current) = self.current.lock() else {
            return None;
        };
        current.as_ref().map(|c| c.record_tx.borrow().clone())
    }

    /// Start a transfer.
    ///
    /// Validation failures are returned synchronously, with the `Failed`
    /// record retained as the session's latest. On success the returned
    /// handle observes the remaining pipeline stages as they run.
    pub fn transfer(&self, request: TransferRequest) -> Result<TransferHandle, WalletError> {
        let Ok(mut current) = self.current.lock() else {
            return Err(WalletError::TransferInProgress);
        };
        if let Some(existing) = current.as_ref() {
            if !existing.record_tx.borrow().is_terminal() {
                return Err(WalletError::TransferInProgress);
            }
        }

        let record = TransactionRecord::new(request.request_id.clone());
        let (record_tx, record_rx) = watch::channel(record);
        let record_tx = Arc::new(record_tx);
        let handle = TransferHandle { rx: record_rx };

        let recipient = match self.validate(&request) {
            Ok(recipient) => recipient,
            Err(err) => {
                let error: WalletError = err.into();
                record_tx.send_modify(|r| r.fail(&error));
                *current = Some(CurrentTransfer {
                    record_tx,
                    task: None,
                });
                return Err(error);
            }
        };
        record_tx.send_modify(|r| r.advance(TransferStatus::Validated));

        let instruction = TransferInstruction {
            from: self.address.clone(),
            to: recipient,
            lamports: request.lamports,
            request_id: request.request_id.clone(),
        };

        let task = tokio::spawn(Self::run(
            self.authenticator.clone(),
            self.relay.clone(),
            self.balance.clone(),
            self.credential.clone(),
            instruction,
            record_tx.clone(),
            self.cancel_rx.clone(),
        ));

        *current = Some(CurrentTransfer {
            record_tx,
            task: Some(task),
        });
        Ok(handle)
    }

    /// Fail the in-flight transfer (if any) with `error` and stop its task.
    ///
    /// Terminal records are left untouched; nothing is silently dropped.
    pub fn abort_current(&self, error: &WalletError) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        if let Some(existing) = current.as_mut() {
            existing.record_tx.send_modify(|record| record.fail(error));
            if let Some(task) = existing.task.take() {
                task.abort();
            }
        }
    }

    fn validate(&self, request: &TransferRequest) -> Result<WalletAddress, ValidationError> {
        if request.lamports == 0 {
            return Err(ValidationError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let recipient = WalletAddress::parse(&request.recipient)?;

        // Advisory check against the latest snapshot; the ledger remains the
        // source of truth at submission time.
        let available = self.balance.current().map(|b| b.lamports).unwrap_or(0);
        if request.lamports > available {
            return Err(ValidationError::InsufficientFunds {
                requested: request.lamports,
                available,
            });
        }

        Ok(recipient)
    }

    async fn run(
        authenticator: CredentialAuthenticator,
        relay: RelayClient,
        balance: Arc<BalanceSync>,
        credential: Credential,
        instruction: TransferInstruction,
        record_tx: Arc<watch::Sender<TransactionRecord>>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let request_id = instruction.request_id.clone();
        let lamports = instruction.lamports;

        if *cancel.borrow() {
            record_tx.send_modify(|r| r.fail(&SessionError::SessionEnded.into()));
            return;
        }

        let signing_bytes = instruction.signing_bytes();
        let signed = tokio::select! {
            result = authenticator.sign(&credential, &signing_bytes) => match result {
                Ok(signature) => SignedTransfer {
                    instruction,
                    signature,
                },
                Err(err) => {
                    record_tx.send_modify(|r| r.fail(&WalletError::Signing(err)));
                    return;
                }
            },
            _ = cancel.changed() => {
                record_tx.send_modify(|r| r.fail(&SessionError::SessionEnded.into()));
                return;
            }
        };
        record_tx.send_modify(|r| r.advance(TransferStatus::Signed));

        let signature = match relay.submit(&signed, &mut cancel).await {
            Ok(signature) => signature,
            Err(err) => {
                let error = if matches!(err, RelayError::Cancelled) {
                    SessionError::SessionEnded.into()
                } else {
                    WalletError::Relay(err)
                };
                record_tx.send_modify(|r| r.fail(&error));
                return;
            }
        };
        record_tx.send_modify(|r| {
            r.signature = Some(signature.clone());
            r.advance(TransferStatus::Submitted);
        });

        match relay.await_finality(&signature, &mut cancel).await {
            Ok(TransactionStatus::Confirmed) => {
                balance.apply_confirmed_debit(&request_id, lamports);
                record_tx.send_modify(|r| r.advance(TransferStatus::Confirmed));
                info!(request_id = %request_id, %signature, "transfer confirmed");
            }
            Ok(status) => {
                // `await_finality` only returns Confirmed on success.
                warn!(request_id = %request_id, ?status, "unexpected finality status");
            }
            Err(err) => {
                let error = if matches!(err, RelayError::Cancelled) {
                    SessionError::SessionEnded.into()
                } else {
                    WalletError::Relay(err)
                };
                record_tx.send_modify(|r| r.fail(&error));
            }
        }
    }
}
