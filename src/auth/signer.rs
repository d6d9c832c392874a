//! Message signing — the signer contract and the local session key.
//!
//! A signer takes any JSON payload, hashes its canonical serialization with
//! Keccak-256 and signs the 32-byte digest. `serde_json::Value` objects are
//! key-sorted, so the digest does not depend on field insertion order.

use std::str::FromStr;

use serde_json::Value;
use sha3::{Digest, Keccak256};
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;

use crate::auth::store::{KeyStore, SESSION_KEY_STORAGE_KEY};
use crate::error::{SdkError, SignerError};
use crate::shared::Address;

/// Anything that can sign protocol messages on behalf of an address.
pub trait MessageSigner: Send + Sync {
    /// The address the broker should attribute signatures to.
    fn address(&self) -> Address;

    /// Sign a JSON payload, returning a `0x`-prefixed hex signature.
    fn sign(&self, payload: &Value) -> Result<String, SignerError>;
}

/// Keccak-256 digest of the payload's canonical JSON encoding.
pub fn payload_digest(payload: &Value) -> Result<[u8; 32], SignerError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| SignerError::Signing(e.to_string()))?;
    Ok(Keccak256::digest(&bytes).into())
}

/// Check a signature produced by a [`SessionKey`].
pub fn verify_signature(address: &Address, payload: &Value, signature: &str) -> bool {
    let Ok(pubkey) = Pubkey::from_str(address.as_str()) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature.trim_start_matches("0x")) else {
        return false;
    };
    let Ok(sig) = Signature::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let Ok(digest) = payload_digest(payload) else {
        return false;
    };
    sig.verify(&pubkey.to_bytes(), &digest)
}

// ─── SessionKey ──────────────────────────────────────────────────────────────

/// Locally generated, low-privilege ed25519 key used to sign protocol messages
/// without prompting the user's primary wallet.
pub struct SessionKey {
    keypair: Keypair,
}

impl SessionKey {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::new(),
        }
    }

    /// Restore from the base58 encoding of the 64-byte keypair.
    pub fn from_base58(encoded: &str) -> Result<Self, SignerError> {
        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { keypair })
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.keypair.to_bytes()).into_string()
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Load the persisted session key, generating and persisting one if absent.
    ///
    /// A stored value that no longer decodes is replaced with a fresh key.
    pub async fn load_or_create(store: &dyn KeyStore) -> Result<Self, SdkError> {
        if let Some(encoded) = store.get(SESSION_KEY_STORAGE_KEY).await? {
            match Self::from_base58(&encoded) {
                Ok(key) => {
                    tracing::debug!("Loaded session key {}", key.address());
                    return Ok(key);
                }
                Err(e) => tracing::warn!("Discarding unreadable session key: {}", e),
            }
        }

        let key = Self::generate();
        store.set(SESSION_KEY_STORAGE_KEY, &key.to_base58()).await?;
        tracing::info!("Generated new session key {}", key.address());
        Ok(key)
    }

    /// Forget the persisted session key.
    pub async fn clear(store: &dyn KeyStore) -> Result<(), SdkError> {
        store.remove(SESSION_KEY_STORAGE_KEY).await?;
        Ok(())
    }
}

impl MessageSigner for SessionKey {
    fn address(&self) -> Address {
        Address::from_pubkey(self.keypair.pubkey())
    }

    fn sign(&self, payload: &Value) -> Result<String, SignerError> {
        let digest = payload_digest(payload)?;
        let signature = self.keypair.sign_message(&digest);
        let bytes: &[u8] = signature.as_ref();
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
