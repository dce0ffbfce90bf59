//! x402 v1 wire types (EVM `exact` scheme only)

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::eth::Network;
use crate::x402::UnixTimestamp;

/// Header carrying the signed payment on the retried request
pub const X_PAYMENT: &str = "X-PAYMENT";

/// Header carrying the settlement receipt on the paid response
pub const X_PAYMENT_RESPONSE: &str = "X-PAYMENT-RESPONSE";

// ============================================================================
// Protocol Version
// ============================================================================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum X402Version {
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            1 => Ok(X402Version::V1),
            other => Err(serde::de::Error::custom(format!(
                "unsupported x402Version: {other}"
            ))),
        }
    }
}

impl fmt::Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            X402Version::V1 => write!(f, "1"),
        }
    }
}

// ============================================================================
// Scheme
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exact")
    }
}

// ============================================================================
// Amounts and nonces
// ============================================================================

/// Amount in the token's smallest unit, carried as a decimal string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl FromStr for TokenAmount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid token amount: {s:?}"));
        }
        U256::from_str(s).map(TokenAmount).map_err(|e| e.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl HexEncodedNonce {
    pub fn random() -> Self {
        HexEncodedNonce(rand::random())
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be 32 bytes"))?;
        Ok(HexEncodedNonce(arr))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Payment Requirements (server -> client)
// ============================================================================

/// One accepted way to pay, as listed in a 402 body's `accepts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl PaymentRequirements {
    /// EIP-712 domain `name`/`version` of the token, from `extra`
    pub fn eip712_name_version(&self) -> (String, String) {
        let field = |key: &str| {
            self.extra
                .as_ref()
                .and_then(|extra| extra.get(key))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_default()
        };
        (field("name"), field("version"))
    }
}

/// Body of a `402 Payment Required` response. `accepts` stays raw so one
/// unusable entry does not hide the others.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: X402Version,
    pub accepts: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Payment Payload (client -> server)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmAuthorization {
    pub from: String,
    pub to: String,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactEvmPayload {
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub authorization: ExactEvmAuthorization,
}

/// Decoded content of the `X-PAYMENT` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactEvmPayload,
}

impl PaymentPayload {
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        Ok(b64.encode(serde_json::to_vec(self)?))
    }

    pub fn from_header_value(value: &str) -> Result<Self, PayloadDecodeError> {
        let bytes = b64.decode(value.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadDecodeError {
    #[error("header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Payment Receipt (server -> client)
// ============================================================================

/// Settlement confirmation decoded from `X-PAYMENT-RESPONSE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl PaymentReceipt {
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        Ok(b64.encode(serde_json::to_vec(self)?))
    }

    pub fn from_header_value(value: &str) -> Result<Self, PayloadDecodeError> {
        let bytes = b64.decode(value.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_requirements() {
        let req: PaymentRequirements = serde_json::from_value(json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "10000",
            "resource": "http://localhost:4021/weather",
            "description": "Weather",
            "mimeType": "application/json",
            "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "maxTimeoutSeconds": 60,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "extra": {"name": "USDC", "version": "2"}
        }))
        .unwrap();
        assert_eq!(req.network, Network::BaseSepolia);
        assert_eq!(req.max_amount_required, TokenAmount::from(10_000));
        assert_eq!(req.eip712_name_version(), ("USDC".into(), "2".into()));
    }

    #[test]
    fn test_token_amount_rejects_non_decimal() {
        assert!(serde_json::from_str::<TokenAmount>("\"-5\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"1.5\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"\"").is_err());
    }

    #[test]
    fn test_unsupported_version() {
        let err = serde_json::from_value::<PaymentRequiredResponse>(json!({
            "x402Version": 2,
            "accepts": []
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_receipt_header_round_trip() {
        let receipt = PaymentReceipt {
            success: true,
            transaction: Some("0xabc123".into()),
            network: "base-sepolia".into(),
            payer: Some("0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".into()),
            error_reason: None,
        };
        let header = receipt.to_header_value().unwrap();
        let decoded = PaymentReceipt::from_header_value(&header).unwrap();
        assert_eq!(decoded, receipt);
    }
}
