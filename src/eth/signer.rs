//! secp256k1 signing for payment authorizations
//!
//! Only what x402 needs: parse a hex private key, derive its Ethereum address,
//! sign a 32-byte prehash, and recover the signer of a 65-byte `r || s || v`
//! signature.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, keccak256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Errors from key parsing, signing and recovery
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("private key is not valid hex")]
    InvalidHex,
    #[error("private key is not a valid secp256k1 scalar")]
    InvalidKey,
    #[error("signing failed")]
    SigningFailed,
    #[error("signature must be 65 bytes, got {0}")]
    InvalidSignatureLength(usize),
    #[error("signature recovery failed")]
    RecoveryFailed,
}

/// A private-key signer. Immutable once built, so one instance can sign any
/// number of independent authorizations concurrently.
#[derive(Clone)]
pub struct EvmSigner {
    key: SigningKey,
    address: Address,
}

impl EvmSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Parse a 32-byte hex private key, `0x` prefix optional
    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let s = s.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|_| SignerError::InvalidHex)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| SignerError::InvalidKey)?;
        Ok(Self::new(key))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a prehashed message, returning Ethereum-style `r || s || v` with
    /// `v` in {27, 28}
    pub fn sign_prehash(&self, hash: &B256) -> Result<[u8; 65], SignerError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|_| SignerError::SigningFailed)?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(out)
    }
}

impl FromStr for EvmSigner {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Never print key material.
impl fmt::Debug for EvmSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    // Uncompressed SEC1 point is 0x04 || x || y; the address is the last 20
    // bytes of keccak256(x || y).
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the address that produced `signature` over `hash`
pub fn recover_address(signature: &[u8], hash: &B256) -> Result<Address, SignerError> {
    if signature.len() != 65 {
        return Err(SignerError::InvalidSignatureLength(signature.len()));
    }
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| SignerError::RecoveryFailed)?;
    let v = signature[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or(SignerError::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recovery_id)
        .map_err(|_| SignerError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Anything able to sign payment authorizations
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: &B256) -> Result<[u8; 65], SignerError>;
}

#[async_trait::async_trait]
impl Signer for EvmSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: &B256) -> Result<[u8; 65], SignerError> {
        self.sign_prehash(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_known_address() {
        let signer = EvmSigner::from_hex(KEY_ONE).unwrap();
        assert_eq!(
            signer.address().to_string(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(EvmSigner::from_hex("0xzz"), Err(SignerError::InvalidHex)));
        assert!(matches!(EvmSigner::from_hex("0x00"), Err(SignerError::InvalidKey)));
        let zero = format!("0x{}", "00".repeat(32));
        assert!(matches!(EvmSigner::from_hex(&zero), Err(SignerError::InvalidKey)));
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = EvmSigner::from_hex(KEY_ONE).unwrap();
        let hash = keccak256(b"payment");
        let signature = signer.sign_prehash(&hash).unwrap();
        assert!(signature[64] == 27 || signature[64] == 28);
        assert_eq!(recover_address(&signature, &hash).unwrap(), signer.address());
    }

    #[test]
    fn test_recover_wrong_hash_gives_other_address() {
        let signer = EvmSigner::from_hex(KEY_ONE).unwrap();
        let signature = signer.sign_prehash(&keccak256(b"a")).unwrap();
        let recovered = recover_address(&signature, &keccak256(b"b")).ok();
        assert_ne!(recovered, Some(signer.address()));
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = EvmSigner::from_hex(KEY_ONE).unwrap();
        let debug = format!("{signer:?}");
        assert!(debug.contains("address"));
        assert!(!debug.contains("key:"));
    }
}
