//! Wallet management: keypair loading and submission signing

use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::errors::SubmitterError;

/// Unsigned portion of a submission, serialized canonically for signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionBody {
    pub account: String,
    pub topic_id: u64,
    pub nonce_height: u64,
    pub value: f64,
    pub sequence: u64,
}

/// Signed submission payload as broadcast to the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    #[serde(flatten)]
    pub body: SubmissionBody,
    /// Hex-encoded verifying key
    pub pubkey: String,
    /// Hex-encoded detached signature over the canonical body JSON
    pub signature: String,
}

/// Wallet manager for handling the signing keypair
#[derive(Debug)]
pub struct WalletManager {
    signing: Arc<SigningKey>,
}

impl WalletManager {
    /// Create a new wallet manager from a keypair file
    ///
    /// Accepts the raw 64-byte keypair format or a JSON byte array of the
    /// same 64 bytes.
    pub fn from_file(path: &str) -> Result<Self, SubmitterError> {
        let keypair_bytes = std::fs::read(path)
            .map_err(|e| SubmitterError::Wallet(format!("Failed to read keypair file {path}: {e}")))?;

        let bytes: Vec<u8> = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else {
            serde_json::from_slice(&keypair_bytes)
                .map_err(|e| SubmitterError::Wallet(format!("Failed to parse keypair JSON: {e}")))?
        };

        if bytes.len() != 64 {
            return Err(SubmitterError::Wallet(format!(
                "Invalid keypair length: expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Err(SubmitterError::Wallet(
                "Invalid keypair: all-zero key rejected".to_string(),
            ));
        }

        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .expect("length checked above");
        let signing = SigningKey::from_keypair_bytes(&arr)
            .map_err(|e| SubmitterError::Wallet(format!("Invalid keypair bytes: {e}")))?;

        Ok(Self {
            signing: Arc::new(signing),
        })
    }

    /// Create a wallet manager from an in-memory signing key
    pub fn from_signing_key(signing: SigningKey) -> Self {
        Self {
            signing: Arc::new(signing),
        }
    }

    /// Ledger account address (base58 of the verifying key)
    pub fn account(&self) -> String {
        bs58::encode(self.signing.verifying_key().as_bytes()).into_string()
    }

    /// Build and sign a submission payload
    pub fn sign_submission(
        &self,
        topic_id: u64,
        nonce_height: u64,
        value: f64,
        sequence: u64,
    ) -> Result<SignedPayload, SubmitterError> {
        let body = SubmissionBody {
            account: self.account(),
            topic_id,
            nonce_height,
            value,
            sequence,
        };
        let canonical = serde_json::to_vec(&body)?;
        let signature = self.signing.sign(&canonical);

        Ok(SignedPayload {
            body,
            pubkey: hex::encode(self.signing.verifying_key().as_bytes()),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            signing: Arc::clone(&self.signing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use std::io::Write;

    fn test_wallet() -> WalletManager {
        WalletManager::from_signing_key(SigningKey::from_bytes(&[7u8; 32]))
    }

    #[test]
    fn test_from_file_raw_bytes() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&signing.to_keypair_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            wallet.account(),
            WalletManager::from_signing_key(signing).account()
        );
    }

    #[test]
    fn test_from_file_json_format() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let json = serde_json::to_vec(&signing.to_keypair_bytes().to_vec()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&json).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(!wallet.account().is_empty());
    }

    #[test]
    fn test_all_zero_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 64]).unwrap();

        let err = WalletManager::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("all-zero"));
    }

    #[test]
    fn test_signature_verifies_against_canonical_body() {
        let wallet = test_wallet();
        let payload = wallet.sign_submission(7, 12_345, 42.5, 3).unwrap();

        let canonical = serde_json::to_vec(&payload.body).unwrap();
        let pubkey_bytes: [u8; 32] = hex::decode(&payload.pubkey)
            .unwrap()
            .try_into()
            .unwrap();
        let sig_bytes: [u8; 64] = hex::decode(&payload.signature)
            .unwrap()
            .try_into()
            .unwrap();

        let verifying = VerifyingKey::from_bytes(&pubkey_bytes).unwrap();
        verifying
            .verify(&canonical, &Signature::from_bytes(&sig_bytes))
            .unwrap();
    }

    #[test]
    fn test_payload_serializes_flat() {
        let wallet = test_wallet();
        let payload = wallet.sign_submission(1, 100, 0.5, 0).unwrap();
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert!(json.get("topic_id").is_some());
        assert!(json.get("signature").is_some());
        assert!(json.get("body").is_none());
    }
}
