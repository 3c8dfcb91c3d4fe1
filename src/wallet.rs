//! Session lifecycle and the caller-facing wallet API.
//!
//! `PasskeyWallet` owns the single session per process and is the only
//! mutator of it. `login`/`logout` transitions are serialized through the
//! lifecycle state itself; no lock is held across a suspension point.
//! Logout (and expiry, which takes the same path) cancels the pending
//! challenge, stops balance sync, and fails any non-terminal transfer
//! with `SessionEnded`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::balance::{Balance, BalanceSync};
use crate::config::WalletConfig;
use crate::error::{SessionError, WalletError};
use crate::ledger::LedgerQuery;
use crate::provider::{CredentialAuthenticator, IdentityProvider};
use crate::relay::{RelayClient, RelayService};
use crate::resolver::SmartWalletResolver;
use crate::transfer::{TransactionRecord, TransferHandle, TransferPipeline, TransferRequest};
use crate::types::{Credential, WalletAddress};

// ═══════════════════════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════════════════════

/// An established session binding a credential to its smart wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletSession {
    pub credential: Credential,
    /// Immutable for the session's lifetime; always equals the resolver's
    /// derivation for the credential.
    pub smart_wallet_address: WalletAddress,
    pub established_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WalletSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    LoggedIn,
}

enum Lifecycle {
    LoggedOut,
    Authenticating,
    LoggedIn(WalletSession),
}

struct Inner {
    lifecycle: Lifecycle,
    cancel_tx: Option<watch::Sender<bool>>,
    balance: Option<Arc<BalanceSync>>,
    pipeline: Option<Arc<TransferPipeline>>,
}

impl Inner {
    /// Tear the session down: cancel the pending challenge and any relay
    /// activity, fail the in-flight transfer, stop balance sync.
    fn end_session(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort_current(&SessionError::SessionEnded.into());
        }
        if let Some(balance) = self.balance.take() {
            balance.stop();
        }
        self.lifecycle = Lifecycle::LoggedOut;
    }

    /// Expire a stale session in place.
    fn check_expiry(&mut self) {
        if let Lifecycle::LoggedIn(session) = &self.lifecycle {
            if session.is_expired() {
                warn!(address = %session.smart_wallet_address, "session expired");
                self.end_session();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET
// ═══════════════════════════════════════════════════════════════════════════════

/// Client-side core of the passkey smart wallet.
///
/// Composes the credential authenticator, address resolver, balance sync,
/// and transfer pipeline behind the session lifecycle.
pub struct PasskeyWallet {
    config: WalletConfig,
    authenticator: CredentialAuthenticator,
    resolver: SmartWalletResolver,
    ledger: Arc<dyn LedgerQuery>,
    relay: Arc<dyn RelayService>,
    inner: Mutex<Inner>,
}

impl PasskeyWallet {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        ledger: Arc<dyn LedgerQuery>,
        relay: Arc<dyn RelayService>,
        config: WalletConfig,
    ) -> Self {
        let authenticator = CredentialAuthenticator::new(provider, config.provider.clone());
        let resolver = SmartWalletResolver::new(ledger.clone());
        Self {
            config,
            authenticator,
            resolver,
            ledger,
            relay,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::LoggedOut,
                cancel_tx: None,
                balance: None,
                pipeline: None,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        let Ok(mut inner) = self.inner.lock() else {
            return SessionState::LoggedOut;
        };
        inner.check_expiry();
        match inner.lifecycle {
            Lifecycle::LoggedOut => SessionState::LoggedOut,
            Lifecycle::Authenticating => SessionState::Authenticating,
            Lifecycle::LoggedIn(_) => SessionState::LoggedIn,
        }
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<WalletSession> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        inner.check_expiry();
        match &inner.lifecycle {
            Lifecycle::LoggedIn(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Authenticate and establish a session.
    ///
    /// Fails with [`SessionError::AlreadyAuthenticated`] while a session is
    /// active or another login is running; any other failure leaves the
    /// wallet logged out.
    pub async fn login(&self) -> Result<WalletSession, WalletError> {
        let mut cancel_rx = {
            let Ok(mut inner) = self.inner.lock() else {
                return Err(SessionError::AlreadyAuthenticated.into());
            };
            inner.check_expiry();
            if !matches!(inner.lifecycle, Lifecycle::LoggedOut) {
                return Err(SessionError::AlreadyAuthenticated.into());
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            inner.cancel_tx = Some(cancel_tx);
            inner.lifecycle = Lifecycle::Authenticating;
            cancel_rx
        };

        let credential = match self.authenticator.authenticate(&mut cancel_rx).await {
            Ok(credential) => credential,
            Err(err) => {
                self.revert_login();
                return Err(err.into());
            }
        };

        let address = match self.resolver.resolve(&credential).await {
            Ok(address) => address,
            Err(err) => {
                self.revert_login();
                return Err(err.into());
            }
        };

        let established_at = Utc::now();
        let session = WalletSession {
            credential: credential.clone(),
            smart_wallet_address: address.clone(),
            established_at,
            expires_at: established_at
                + chrono::Duration::seconds(self.config.session.ttl_secs as i64),
        };

        let Ok(mut inner) = self.inner.lock() else {
            return Err(SessionError::SessionEnded.into());
        };
        if !matches!(inner.lifecycle, Lifecycle::Authenticating) {
            // Logged out while we were finishing up.
            return Err(SessionError::SessionEnded.into());
        }

        let balance = BalanceSync::start(
            self.ledger.clone(),
            address.clone(),
            self.config.balance.clone(),
        );
        let pipeline = Arc::new(TransferPipeline::new(
            self.authenticator.clone(),
            RelayClient::new(self.relay.clone(), self.config.relay.clone()),
            balance.clone(),
            credential,
            address.clone(),
            cancel_rx,
        ));

        inner.balance = Some(balance);
        inner.pipeline = Some(pipeline);
        inner.lifecycle = Lifecycle::LoggedIn(session.clone());

        info!(address = %address, "session established");
        Ok(session)
    }

    /// End the active session.
    ///
    /// Cancels any pending challenge, stops balance sync, and fails a
    /// non-terminal transfer with `SessionEnded`.
    pub fn logout(&self) -> Result<(), WalletError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(SessionError::NotAuthenticated.into());
        };
        if matches!(inner.lifecycle, Lifecycle::LoggedOut) {
            return Err(SessionError::NotAuthenticated.into());
        }
        inner.end_session();
        info!("logged out");
        Ok(())
    }

    /// Latest balance snapshot for the active session, if one exists yet.
    pub fn current_balance(&self) -> Option<Balance> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        inner.check_expiry();
        inner.balance.as_ref().and_then(|b| b.current())
    }

    /// Subscribe to the session's balance snapshot sequence.
    pub fn balance_updates(&self) -> Result<watch::Receiver<Option<Balance>>, WalletError> {
        let Ok(mut inner) = self.inner.lock() else {
            return Err(SessionError::NotAuthenticated.into());
        };
        inner.check_expiry();
        inner
            .balance
            .as_ref()
            .map(|b| b.subscribe())
            .ok_or_else(|| SessionError::NotAuthenticated.into())
    }

    /// Start a transfer from the session's smart wallet.
    ///
    /// Returns immediately with a handle that observes the record's state
    /// transitions. Fails with [`WalletError::TransferInProgress`] while a
    /// prior transfer is non-terminal.
    pub fn transfer(&self, request: TransferRequest) -> Result<TransferHandle, WalletError> {
        let pipeline = {
            let Ok(mut inner) = self.inner.lock() else {
                return Err(SessionError::NotAuthenticated.into());
            };
            inner.check_expiry();
            match &inner.lifecycle {
                Lifecycle::LoggedIn(_) => inner
                    .pipeline
                    .clone()
                    .ok_or(WalletError::Session(SessionError::NotAuthenticated))?,
                _ => return Err(SessionError::NotAuthenticated.into()),
            }
        };
        pipeline.transfer(request)
    }

    /// Latest transfer record for the active session, terminal or not.
    pub fn current_transfer(&self) -> Option<TransactionRecord> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        inner.check_expiry();
        inner.pipeline.as_ref().and_then(|p| p.current_record())
    }

    fn revert_login(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if matches!(inner.lifecycle, Lifecycle::Authenticating) {
                inner.cancel_tx = None;
                inner.lifecycle = Lifecycle::LoggedOut;
            }
        }
    }
}

impl Drop for PasskeyWallet {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.end_session();
        }
    }
}
