//! Deterministic smart-wallet address resolution.
//!
//! The wallet address is a pure function of the credential id and the
//! on-chain program configuration, so every login re-derives and verifies
//! instead of trusting a cached value. The cache never expires (the
//! mapping is permanent for a given configuration) and is superseded when
//! the ledger reports a new configuration version.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ResolutionError;
use crate::ledger::LedgerQuery;
use crate::types::{Credential, ProgramConfig, WalletAddress};

/// Domain seed shared with the on-chain smart-wallet program.
const SMART_WALLET_SEED: &[u8] = b"smart_wallet";

#[derive(Clone, Debug)]
struct CachedResolution {
    config_version: u64,
    address: WalletAddress,
}

/// Resolves the smart-wallet address owned by a credential.
pub struct SmartWalletResolver {
    ledger: Arc<dyn LedgerQuery>,
    cache: RwLock<HashMap<String, CachedResolution>>,
}

impl SmartWalletResolver {
    pub fn new(ledger: Arc<dyn LedgerQuery>) -> Self {
        Self {
            ledger,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Derive the address for `credential` under the current program
    /// configuration, updating the cache.
    pub async fn resolve(&self, credential: &Credential) -> Result<WalletAddress, ResolutionError> {
        if credential.id.is_empty() {
            return Err(ResolutionError::DerivationFailed(
                "empty credential id".to_string(),
            ));
        }

        let config = self
            .ledger
            .get_program_config()
            .await
            .map_err(|e| ResolutionError::ConfigUnavailable(e.to_string()))?;

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&credential.id) {
                if entry.config_version == config.version {
                    return Ok(entry.address.clone());
                }
                debug!(
                    credential_id = %credential.id,
                    old_version = entry.config_version,
                    new_version = config.version,
                    "program config changed, re-deriving"
                );
            }
        }

        let address = derive_address(&credential.id, &config);
        self.cache.write().await.insert(
            credential.id.clone(),
            CachedResolution {
                config_version: config.version,
                address: address.clone(),
            },
        );
        debug!(credential_id = %credential.id, %address, "wallet address resolved");
        Ok(address)
    }

    /// Last resolved address for a credential, without touching the ledger.
    pub async fn cached(&self, credential_id: &str) -> Option<WalletAddress> {
        self.cache
            .read()
            .await
            .get(credential_id)
            .map(|entry| entry.address.clone())
    }
}

/// Pure derivation: identical inputs always yield the identical address.
pub fn derive_address(credential_id: &str, config: &ProgramConfig) -> WalletAddress {
    let mut hasher = Sha256::new();
    hasher.update(SMART_WALLET_SEED);
    hasher.update(b"|");
    hasher.update(config.program_id.as_bytes());
    hasher.update(b"|");
    hasher.update(config.version.to_be_bytes());
    hasher.update(b"|");
    hasher.update(credential_id.as_bytes());

    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    WalletAddress::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::ledger::LedgerError;

    struct StubLedger {
        config_version: AtomicU64,
    }

    #[async_trait]
    impl LedgerQuery for StubLedger {
        async fn get_balance(&self, _address: &WalletAddress) -> Result<u64, LedgerError> {
            Ok(0)
        }

        async fn get_program_config(&self) -> Result<ProgramConfig, LedgerError> {
            Ok(ProgramConfig {
                program_id: "LazrWa11etProgram".to_string(),
                version: self.config_version.load(Ordering::SeqCst),
            })
        }
    }

    fn resolver() -> (SmartWalletResolver, Arc<StubLedger>) {
        let ledger = Arc::new(StubLedger {
            config_version: AtomicU64::new(1),
        });
        (SmartWalletResolver::new(ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let (resolver, _) = resolver();
        let credential = Credential::new("cred-1");

        let first = resolver.resolve(&credential).await.unwrap();
        let second = resolver.resolve(&credential).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_distinct_credentials_get_distinct_addresses() {
        let (resolver, _) = resolver();
        let a = resolver.resolve(&Credential::new("cred-a")).await.unwrap();
        let b = resolver.resolve(&Credential::new("cred-b")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_config_change_invalidates_cache() {
        let (resolver, ledger) = resolver();
        let credential = Credential::new("cred-1");

        let before = resolver.resolve(&credential).await.unwrap();
        ledger.config_version.store(2, Ordering::SeqCst);
        let after = resolver.resolve(&credential).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(resolver.cached("cred-1").await, Some(after));
    }

    #[tokio::test]
    async fn test_empty_credential_id_is_rejected() {
        let (resolver, _) = resolver();
        let mut credential = Credential::new("x");
        credential.id.clear();
        assert!(matches!(
            resolver.resolve(&credential).await,
            Err(ResolutionError::DerivationFailed(_))
        ));
    }
}
