//! Ledger query boundary.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ProgramConfig, WalletAddress};

/// Failure talking to the ledger query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger error: {0}")]
pub struct LedgerError(pub String);

/// Read-only ledger queries consumed by balance sync and address resolution.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    /// Current confirmed balance of `address`, in lamports.
    async fn get_balance(&self, address: &WalletAddress) -> Result<u64, LedgerError>;

    /// Current smart-wallet program configuration.
    async fn get_program_config(&self) -> Result<ProgramConfig, LedgerError>;
}
