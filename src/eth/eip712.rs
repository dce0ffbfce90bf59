//! EIP-712 hashing for EIP-3009 `TransferWithAuthorization`
//!
//! x402's `exact` EVM scheme has the payer sign a USDC-style transfer
//! authorization. The signing hash is
//! `keccak256(0x1901 || domainSeparator || structHash)`.

use alloy_primitives::{Address, B256, U256, keccak256};
use once_cell::sync::Lazy;

use super::signer::{Signer, SignerError, recover_address};

static DOMAIN_TYPE_HASH: Lazy<B256> = Lazy::new(|| {
    keccak256("EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)")
});

static TRANSFER_TYPE_HASH: Lazy<B256> = Lazy::new(|| {
    keccak256(
        "TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)",
    )
});

/// EIP-712 domain of the token contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    pub fn separator(&self) -> B256 {
        let mut encoded = Vec::with_capacity(5 * 32);
        encoded.extend_from_slice(DOMAIN_TYPE_HASH.as_slice());
        encoded.extend_from_slice(keccak256(self.name.as_bytes()).as_slice());
        encoded.extend_from_slice(keccak256(self.version.as_bytes()).as_slice());
        encoded.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        encoded.extend_from_slice(&address_word(&self.verifying_contract));
        keccak256(&encoded)
    }
}

/// EIP-3009 transfer authorization in typed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferWithAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: [u8; 32],
}

impl TransferWithAuthorization {
    fn struct_hash(&self) -> B256 {
        let mut encoded = Vec::with_capacity(7 * 32);
        encoded.extend_from_slice(TRANSFER_TYPE_HASH.as_slice());
        encoded.extend_from_slice(&address_word(&self.from));
        encoded.extend_from_slice(&address_word(&self.to));
        encoded.extend_from_slice(&self.value.to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(self.valid_after).to_be_bytes::<32>());
        encoded.extend_from_slice(&U256::from(self.valid_before).to_be_bytes::<32>());
        encoded.extend_from_slice(&self.nonce);
        keccak256(&encoded)
    }

    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        let mut encoded = Vec::with_capacity(2 + 64);
        encoded.extend_from_slice(b"\x19\x01");
        encoded.extend_from_slice(domain.separator().as_slice());
        encoded.extend_from_slice(self.struct_hash().as_slice());
        keccak256(&encoded)
    }

    pub async fn sign(
        &self,
        domain: &Eip712Domain,
        signer: &dyn Signer,
    ) -> Result<[u8; 65], SignerError> {
        signer.sign_hash(&self.signing_hash(domain)).await
    }

    /// Address that signed this authorization under `domain`
    pub fn recover_signer(
        &self,
        domain: &Eip712Domain,
        signature: &[u8],
    ) -> Result<Address, SignerError> {
        recover_address(signature, &self.signing_hash(domain))
    }
}

// ABI encoding of an address: left-padded to 32 bytes.
fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::eth::EvmSigner;

    fn usdc_base_sepolia() -> Eip712Domain {
        Eip712Domain {
            name: "USDC".to_string(),
            version: "2".to_string(),
            chain_id: 84532,
            verifying_contract: Address::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e")
                .unwrap(),
        }
    }

    fn authorization(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::from_str("0x2222222222222222222222222222222222222222").unwrap(),
            value: U256::from(10_000u64),
            valid_after: 0,
            valid_before: 1_900_000_000,
            nonce: [7u8; 32],
        }
    }

    #[test]
    fn test_type_hash_matches_eip3009() {
        // Published constant from FiatTokenV2 (EIP-3009)
        assert_eq!(
            hex::encode(TRANSFER_TYPE_HASH.as_slice()),
            "7c7c6cdb67a18743f49ec6fa9b35f50d52ed05cbed4cc592e13b44501c1a2267"
        );
    }

    #[test]
    fn test_hash_binds_every_field() {
        let domain = usdc_base_sepolia();
        let base = authorization(Address::ZERO);
        let hash = base.signing_hash(&domain);

        let mut other = base.clone();
        other.value = U256::from(10_001u64);
        assert_ne!(hash, other.signing_hash(&domain));

        let mut other = base.clone();
        other.nonce = [8u8; 32];
        assert_ne!(hash, other.signing_hash(&domain));

        let mut other_domain = domain.clone();
        other_domain.chain_id = 8453;
        assert_ne!(hash, base.signing_hash(&other_domain));
    }

    #[tokio::test]
    async fn test_sign_then_recover() {
        let signer = EvmSigner::from_hex(&format!("0x{}", "11".repeat(32))).unwrap();
        let domain = usdc_base_sepolia();
        let auth = authorization(signer.address());

        let signature = auth.sign(&domain, &signer).await.unwrap();
        assert_eq!(auth.recover_signer(&domain, &signature).unwrap(), signer.address());
    }
}
