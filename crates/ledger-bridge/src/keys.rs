//! Client keys - ed25519 signers, base58 addresses and JSON key files

use crate::error::BridgeError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use fl_orchestrator::IdentityProvider;
use fl_types::{Address, ClientIdentity, SubmissionSigner};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// ed25519 key pair acting as a client's signing capability
pub struct KeypairSigner {
    signing_key: SigningKey,
}

impl KeypairSigner {
    /// Fresh random key
    pub fn generate() -> Self {
        Self::from_rng(&mut rand::thread_rng())
    }

    pub fn from_rng<R: RngCore>(rng: &mut R) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Parse a base58-encoded 32-byte secret
    pub fn from_base58(encoded: &str) -> Result<Self, String> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| e.to_string())?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        Ok(Self::from_secret(secret))
    }

    pub fn secret_base58(&self) -> String {
        bs58::encode(self.signing_key.to_bytes()).into_string()
    }

    /// Base58 of the public key
    pub fn address(&self) -> Address {
        Address::new(bs58::encode(self.signing_key.verifying_key().to_bytes()).into_string())
    }

    pub fn into_identity(self) -> ClientIdentity {
        ClientIdentity::new(self.address(), Arc::new(self))
    }
}

impl SubmissionSigner for KeypairSigner {
    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.signing_key.sign(payload).to_bytes().to_vec()
    }
}

/// Check `signature` over `payload` against the key encoded in `address`
pub fn verify(address: &Address, payload: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = bs58::decode(address.as_str()).into_vec() else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(payload, &signature).is_ok()
}

/// Generate `count` identities; a seed makes the addresses reproducible
pub fn generate_identities(count: usize, seed: Option<u64>) -> Vec<ClientIdentity> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..count)
        .map(|_| KeypairSigner::from_rng(&mut rng).into_identity())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyEntry {
    address: String,
    secret_key: String,
}

/// Ordered client accounts loaded from (or saved to) a JSON file
///
/// ```json
/// [{ "address": "<base58 public key>", "secret_key": "<base58 secret>" }]
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyFile {
    entries: Vec<KeyEntry>,
}

impl KeyFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(&path)?;
        let entries: Vec<KeyEntry> = serde_json::from_str(&contents)?;
        tracing::info!(
            "Loaded {} accounts from {:?}",
            entries.len(),
            path.as_ref()
        );
        Ok(Self { entries })
    }

    pub fn from_signers(signers: &[KeypairSigner]) -> Self {
        Self {
            entries: signers
                .iter()
                .map(|s| KeyEntry {
                    address: s.address().to_string(),
                    secret_key: s.secret_base58(),
                })
                .collect(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), BridgeError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityProvider for KeyFile {
    type Error = BridgeError;

    /// Every entry must parse and derive its declared address
    fn identities(&self) -> Result<Vec<ClientIdentity>, BridgeError> {
        if self.entries.is_empty() {
            return Err(BridgeError::EmptyKeyFile);
        }

        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let signer = KeypairSigner::from_base58(&entry.secret_key)
                    .map_err(|reason| BridgeError::InvalidKey { index, reason })?;
                let derived = signer.address();
                if derived.as_str() != entry.address {
                    return Err(BridgeError::AddressMismatch {
                        index,
                        declared: entry.address.clone(),
                        derived: derived.to_string(),
                    });
                }
                Ok(signer.into_identity())
            })
            .collect()
    }
}
