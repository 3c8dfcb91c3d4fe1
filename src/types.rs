//! Core identity and transfer payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::LAMPORTS_PER_SOL;

/// A passkey-backed credential, as issued by the identity provider.
///
/// The `id` is stable for the lifetime of the physical passkey: the same
/// authenticator always yields the same credential id, which is what the
/// smart-wallet address derivation keys off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque credential identifier.
    pub id: String,
    /// When the credential was issued.
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A server-issued authentication challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
    /// Provider-side challenge identifier, echoed back on completion or abort.
    pub id: String,
    /// Random nonce the authenticator signs over.
    pub nonce: [u8; 32],
}

impl Challenge {
    /// Create a challenge with a random nonce.
    pub fn random(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nonce: rand::random(),
        }
    }
}

/// A signed assertion produced by the passkey in response to a challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assertion {
    /// Credential that produced the signature.
    pub credential_id: String,
    /// Signature over the challenge nonce.
    pub signature: Vec<u8>,
}

/// On-chain address of a smart wallet, as base58 text of 32 bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and validate an address string.
    ///
    /// Accepts base58 text that decodes to exactly 32 bytes, which is the
    /// only syntactic requirement the target ledger imposes.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| ValidationError::InvalidRecipient(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(ValidationError::InvalidRecipient(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Build an address from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated idempotency key for one logical transfer attempt.
///
/// Stable across retries of the same attempt; the relay deduplicates by it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-chain program configuration that parameterizes address derivation.
///
/// `version` bumps whenever the program configuration changes; cached
/// derivations for earlier versions must be discarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Address of the smart-wallet program.
    pub program_id: String,
    /// Monotonic configuration version.
    pub version: u64,
}

/// An unsigned transfer instruction, built by the pipeline before signing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferInstruction {
    /// Sending smart-wallet address.
    pub from: WalletAddress,
    /// Recipient address.
    pub to: WalletAddress,
    /// Amount in lamports.
    pub lamports: u64,
    /// Idempotency key for the submission.
    pub request_id: RequestId,
}

impl TransferInstruction {
    /// Canonical byte encoding the passkey signs over.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = b"passkey_wallet:transfer:v1|".to_vec();
        bytes.extend_from_slice(self.from.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(self.to.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(&self.lamports.to_be_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(self.request_id.as_str().as_bytes());
        bytes
    }
}

/// A transfer instruction plus its credential-bound signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub instruction: TransferInstruction,
    /// Raw signature bytes from the passkey.
    pub signature: Vec<u8>,
}

impl SignedTransfer {
    /// Signature as base58 text, the form the ledger reports back.
    pub fn signature_base58(&self) -> String {
        bs58::encode(&self.signature).into_string()
    }
}

/// Convert lamports to whole SOL for display.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convert a SOL amount to lamports, rounding down.
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64) as u64
}
