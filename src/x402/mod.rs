//! x402 payment protocol integration
//!
//! This module contains the paying side of x402 v1:
//! - Challenge detection and authorization signing
//! - Payment middleware for reqwest clients
//! - A request client that normalizes responses and receipts
//! - The `x402-request` tool built on top of it

pub mod challenge;
pub mod client;
pub mod middleware;
pub mod timestamp;
pub mod tool;
pub mod types;

pub use challenge::{
    ChallengeParseError, PaymentAuthorization, PaymentChallenge, ReceiptError, SigningError,
    build_authorization, decode_receipt, detect_challenge,
};
pub use client::{ClientConfig, HttpRequest, NormalizedResponse, PaymentClient, RequestError, x402_client};
pub use middleware::{X402Payments, X402PaymentsError};
pub use timestamp::UnixTimestamp;
pub use tool::x402_request_tool;
pub use types::{PaymentPayload, PaymentReceipt, PaymentRequirements, TokenAmount};
