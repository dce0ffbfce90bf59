//! Turning a `402 Payment Required` into a signed authorization
//!
//! Three steps, each usable on its own:
//! - [`detect_challenge`] reads the 402 body and picks one payment option
//! - [`build_authorization`] signs an EIP-3009 transfer for that option
//! - [`decode_receipt`] reads the settlement receipt off the paid response

use std::str::FromStr;
use std::time::SystemTimeError;

use alloy_primitives::Address;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;

use crate::eth::{Eip712Domain, Network, Signer, SignerError, TransferWithAuthorization};
use crate::x402::UnixTimestamp;
use crate::x402::types::{
    ExactEvmAuthorization, ExactEvmPayload, HexEncodedNonce, PayloadDecodeError, PaymentPayload,
    PaymentReceipt, PaymentRequiredResponse, PaymentRequirements, Scheme, X402Version,
    X_PAYMENT_RESPONSE,
};

/// Authorizations become valid this far in the past to absorb clock skew
pub const VALID_AFTER_SKEW_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum ChallengeParseError {
    #[error("402 body is not a valid payment challenge: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no usable payment option among {offered} offered ({})", .skipped.join("; "))]
    NoUsableRequirements { offered: usize, skipped: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("system clock is before the Unix epoch")]
    Clock(#[source] SystemTimeError),
    #[error("invalid {field} address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("{X_PAYMENT_RESPONSE} header is not ASCII")]
    NotAscii,
    #[error("invalid {X_PAYMENT_RESPONSE} header: {0}")]
    Decode(#[from] PayloadDecodeError),
}

/// A parsed payment demand with one selected way to pay
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentChallenge {
    pub x402_version: X402Version,
    pub requirements: PaymentRequirements,
    /// Server's explanation, e.g. "X-PAYMENT header is required"
    pub error: Option<String>,
}

/// Inspect a response for a payment challenge.
///
/// Anything other than 402 is `Ok(None)`. A 402 whose body cannot be turned
/// into a usable challenge is an error.
pub fn detect_challenge(
    status: StatusCode,
    body: &[u8],
) -> Result<Option<PaymentChallenge>, ChallengeParseError> {
    detect_challenge_preferring(status, body, &[])
}

/// As [`detect_challenge`], choosing among the accepted options by `prefer`
/// order first, then by the order the server listed them.
pub fn detect_challenge_preferring(
    status: StatusCode,
    body: &[u8],
    prefer: &[Network],
) -> Result<Option<PaymentChallenge>, ChallengeParseError> {
    if status != StatusCode::PAYMENT_REQUIRED {
        return Ok(None);
    }
    parse_challenge(body, prefer).map(Some)
}

pub(crate) fn parse_challenge(
    body: &[u8],
    prefer: &[Network],
) -> Result<PaymentChallenge, ChallengeParseError> {
    let response: PaymentRequiredResponse = serde_json::from_slice(body)?;
    let offered = response.accepts.len();

    let mut usable = Vec::with_capacity(offered);
    let mut skipped = Vec::new();
    for (index, entry) in response.accepts.into_iter().enumerate() {
        match serde_json::from_value::<PaymentRequirements>(entry) {
            Ok(requirements) => usable.push(requirements),
            Err(e) => {
                tracing::debug!(index, error = %e, "skipping payment option");
                skipped.push(format!("#{index}: {e}"));
            }
        }
    }

    // Stable sort keeps server order within the same preference rank
    usable.sort_by_key(|req| {
        prefer
            .iter()
            .position(|network| *network == req.network)
            .unwrap_or(usize::MAX)
    });

    let requirements = usable
        .into_iter()
        .next()
        .ok_or(ChallengeParseError::NoUsableRequirements { offered, skipped })?;

    Ok(PaymentChallenge {
        x402_version: response.x402_version,
        requirements,
        error: response.error,
    })
}

/// A signed payment, good for exactly one request
#[derive(Debug)]
pub struct PaymentAuthorization {
    payload: PaymentPayload,
}

impl PaymentAuthorization {
    pub fn payload(&self) -> &PaymentPayload {
        &self.payload
    }

    /// Encode for the `X-PAYMENT` header. Consumes the authorization.
    pub fn into_header_value(self) -> Result<HeaderValue, AuthorizationEncodeError> {
        let encoded = self.payload.to_header_value()?;
        Ok(HeaderValue::from_str(&encoded)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorizationEncodeError {
    #[error("failed to encode payment payload to JSON")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode payment payload as a header value")]
    Header(#[from] http::header::InvalidHeaderValue),
}

/// Sign an authorization for `challenge` with a fresh nonce and the current time
pub async fn build_authorization(
    challenge: &PaymentChallenge,
    signer: &dyn Signer,
) -> Result<PaymentAuthorization, SigningError> {
    let now = UnixTimestamp::try_now().map_err(SigningError::Clock)?;
    build_authorization_at(challenge, signer, now, HexEncodedNonce::random()).await
}

/// Deterministic core of [`build_authorization`]
pub async fn build_authorization_at(
    challenge: &PaymentChallenge,
    signer: &dyn Signer,
    now: UnixTimestamp,
    nonce: HexEncodedNonce,
) -> Result<PaymentAuthorization, SigningError> {
    let req = &challenge.requirements;
    let pay_to = parse_address("payTo", &req.pay_to)?;
    let asset = parse_address("asset", &req.asset)?;
    let (name, version) = req.eip712_name_version();

    let valid_after = UnixTimestamp(now.seconds_since_epoch().saturating_sub(VALID_AFTER_SKEW_SECS));
    let valid_before = now + req.max_timeout_seconds;

    let domain = Eip712Domain {
        name,
        version,
        chain_id: req.network.chain_id(),
        verifying_contract: asset,
    };
    let transfer = TransferWithAuthorization {
        from: signer.address(),
        to: pay_to,
        value: req.max_amount_required.0,
        valid_after: valid_after.seconds_since_epoch(),
        valid_before: valid_before.seconds_since_epoch(),
        nonce: nonce.0,
    };
    let signature = transfer.sign(&domain, signer).await?;

    tracing::debug!(
        network = %req.network,
        pay_to = %pay_to,
        amount = %req.max_amount_required,
        "signed payment authorization"
    );

    Ok(PaymentAuthorization {
        payload: PaymentPayload {
            x402_version: challenge.x402_version,
            scheme: Scheme::Exact,
            network: req.network,
            payload: ExactEvmPayload {
                signature: signature.to_vec(),
                authorization: ExactEvmAuthorization {
                    from: signer.address().to_string(),
                    to: pay_to.to_string(),
                    value: req.max_amount_required,
                    valid_after,
                    valid_before,
                    nonce,
                },
            },
        },
    })
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, SigningError> {
    Address::from_str(value.trim()).map_err(|_| SigningError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Read the settlement receipt, if the server sent one
pub fn decode_receipt(headers: &HeaderMap) -> Result<Option<PaymentReceipt>, ReceiptError> {
    let Some(value) = headers.get(X_PAYMENT_RESPONSE) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ReceiptError::NotAscii)?;
    Ok(Some(PaymentReceipt::from_header_value(value)?))
}

/// Server-supplied reason from a 402 body, if any
pub(crate) fn rejection_reason(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}
