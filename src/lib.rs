//! passkey-wallet
//!
//! Client-side core of a passkey-authenticated smart-contract wallet that
//! submits fee-sponsored transfers through a relay.
//!
//! # Design
//!
//! The wallet never holds a raw private key. A hardware-backed passkey
//! authenticates the user against an identity provider; the smart-wallet
//! address is derived deterministically from the credential and the
//! on-chain program configuration; transfers are signed by the passkey and
//! submitted through a fee-paying relay that deduplicates by request id.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          PasskeyWallet                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌───────────────────┐   ┌────────────────────┐                  │
//! │  │ Credential        │──▶│ SmartWalletResolver│   login()        │
//! │  │ Authenticator     │   │ (derive + cache)   │                  │
//! │  └───────┬───────────┘   └─────────┬──────────┘                  │
//! │          │ IdentityProvider        │ LedgerQuery                 │
//! │          │                         ▼                             │
//! │          │               ┌────────────────────┐                  │
//! │          │               │    BalanceSync     │  poll + reconcile│
//! │          │               └─────────┬──────────┘                  │
//! │          ▼                         │ snapshots                   │
//! │  ┌───────────────────┐             ▼                             │
//! │  │ TransferPipeline  │───▶ validate → sign → submit → confirm    │
//! │  └───────┬───────────┘                                           │
//! │          │ RelayClient (idempotent retry, backoff)               │
//! │          ▼                                                       │
//! │     RelayService                                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External collaborators (identity provider, ledger query service,
//! relay/sponsor service) are trait boundaries; the crate mandates no wire
//! encoding beyond them. Sessions live in memory only; a process restart
//! requires re-authentication.

pub mod balance;
pub mod config;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod relay;
pub mod resolver;
pub mod transfer;
pub mod types;
pub mod wallet;

pub use balance::{Balance, BalanceSource, BalanceSync};
pub use config::{BalanceConfig, ProviderConfig, RelayConfig, SessionConfig, WalletConfig};
pub use error::{
    AuthError, RelayError, ResolutionError, SessionError, SigningError, ValidationError,
    WalletError,
};
pub use ledger::{LedgerError, LedgerQuery};
pub use provider::{CredentialAuthenticator, IdentityProvider};
pub use relay::{RelayClient, RelayService, TransactionStatus};
pub use resolver::{derive_address, SmartWalletResolver};
pub use transfer::{
    TransactionRecord, TransferHandle, TransferPipeline, TransferRequest, TransferStatus,
};
pub use types::{
    lamports_to_sol, sol_to_lamports, Assertion, Challenge, Credential, ProgramConfig, RequestId,
    SignedTransfer, TransferInstruction, WalletAddress,
};
pub use wallet::{PasskeyWallet, SessionState, WalletSession};

/// Lamports per SOL on the target ledger.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
