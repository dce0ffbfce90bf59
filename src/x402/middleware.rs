//! x402 reqwest middleware (EVM `exact` scheme)
//!
//! Sends the request once. On `402 Payment Required` it parses the challenge,
//! signs a transfer authorization and retries exactly once with `X-PAYMENT`.
//! A second 402 is a terminal [`X402PaymentsError::PaymentFailed`].

use std::sync::Arc;

use async_trait::async_trait;
use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Client, ClientBuilder, Request, Response};
use reqwest_middleware as rqm;
use rqm::ClientWithMiddleware;

use crate::eth::{Network, Signer};
use crate::x402::challenge::{
    self, AuthorizationEncodeError, ChallengeParseError, PaymentChallenge, SigningError,
};
use crate::x402::types::{TokenAmount, X_PAYMENT, X_PAYMENT_RESPONSE};

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum X402PaymentsError {
    #[error(transparent)]
    ChallengeParse(#[from] ChallengeParseError),
    #[error("failed to sign payment: {0}")]
    Signing(#[from] SigningError),
    #[error("payment amount {requested} exceeds maximum allowed {allowed} on {network}")]
    PaymentAmountTooLarge {
        requested: TokenAmount,
        allowed: TokenAmount,
        network: Network,
    },
    #[error("payment rejected: {reason}")]
    PaymentFailed { reason: String },
    #[error("request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    #[error("failed to encode payment header: {0}")]
    HeaderEncode(#[from] AuthorizationEncodeError),
}

impl From<X402PaymentsError> for rqm::Error {
    fn from(error: X402PaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

// ============================================================================
// X402Payments middleware
// ============================================================================

#[derive(Clone)]
pub struct X402Payments {
    signer: Arc<dyn Signer>,
    max_amount: Option<TokenAmount>,
    prefer: Vec<Network>,
}

impl X402Payments {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            max_amount: None,
            prefer: vec![],
        }
    }

    /// Refuse to pay more than `max` per request, in token base units
    pub fn max(mut self, max: TokenAmount) -> Self {
        self.max_amount = Some(max);
        self
    }

    pub fn prefer<T: Into<Vec<Network>>>(mut self, prefer: T) -> Self {
        self.prefer.append(&mut prefer.into());
        self
    }

    pub fn assert_max_amount(&self, selected: &PaymentChallenge) -> Result<(), X402PaymentsError> {
        let requested = selected.requirements.max_amount_required;
        if let Some(allowed) = self.max_amount
            && requested > allowed
        {
            return Err(X402PaymentsError::PaymentAmountTooLarge {
                requested,
                allowed,
                network: selected.requirements.network,
            });
        }
        Ok(())
    }

    async fn payment_header(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<HeaderValue, X402PaymentsError> {
        self.assert_max_amount(challenge)?;
        let authorization = challenge::build_authorization(challenge, self.signer.as_ref()).await?;
        Ok(authorization.into_header_value()?)
    }
}

#[async_trait]
impl rqm::Middleware for X402Payments {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }

        let url = res.url().clone();
        let body = res.bytes().await?;
        let challenge = challenge::parse_challenge(&body, &self.prefer)
            .map_err(X402PaymentsError::from)?;

        tracing::info!(
            %url,
            network = %challenge.requirements.network,
            amount = %challenge.requirements.max_amount_required,
            pay_to = %challenge.requirements.pay_to,
            "payment required, signing authorization"
        );

        let payment_header = self.payment_header(&challenge).await?;

        let retry_req = {
            let mut req = retry_req.ok_or(X402PaymentsError::RequestNotCloneable)?;
            let headers = req.headers_mut();
            headers.insert(X_PAYMENT, payment_header);
            headers.insert(
                "Access-Control-Expose-Headers",
                HeaderValue::from_static(X_PAYMENT_RESPONSE),
            );
            req
        };

        let response = next.run(retry_req, extensions).await?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let status = response.status();
            let body = response.bytes().await?;
            let reason = challenge::rejection_reason(&body)
                .unwrap_or_else(|| status.to_string());
            tracing::warn!(%url, %reason, "payment rejected on retry");
            return Err(X402PaymentsError::PaymentFailed { reason }.into());
        }

        tracing::debug!(%url, status = %response.status(), "paid request completed");
        Ok(response)
    }
}

// ============================================================================
// Builder extension traits
// ============================================================================

pub struct ReqwestWithPaymentsBuilder<A> {
    inner: A,
    x402: X402Payments,
}

impl<A> ReqwestWithPaymentsBuilder<A> {
    pub fn max(self, max: TokenAmount) -> Self {
        Self {
            inner: self.inner,
            x402: self.x402.max(max),
        }
    }

    pub fn prefer<T: Into<Vec<Network>>>(self, prefer: T) -> Self {
        Self {
            inner: self.inner,
            x402: self.x402.prefer(prefer),
        }
    }
}

pub trait ReqwestWithPaymentsBuild {
    type BuildResult;

    fn build(self) -> Self::BuildResult;
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<Client> {
    type BuildResult = ClientWithMiddleware;

    fn build(self) -> Self::BuildResult {
        rqm::ClientBuilder::new(self.inner).with(self.x402).build()
    }
}

impl ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<ClientBuilder> {
    type BuildResult = Result<ClientWithMiddleware, reqwest::Error>;

    fn build(self) -> Self::BuildResult {
        let client = self.inner.build()?;
        Ok(rqm::ClientBuilder::new(client).with(self.x402).build())
    }
}

pub trait ReqwestWithPayments {
    type Inner;

    fn with_payments(self, signer: Arc<dyn Signer>) -> ReqwestWithPaymentsBuilder<Self::Inner>;
}

impl ReqwestWithPayments for Client {
    type Inner = Client;

    fn with_payments(self, signer: Arc<dyn Signer>) -> ReqwestWithPaymentsBuilder<Self::Inner> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402: X402Payments::new(signer),
        }
    }
}

impl ReqwestWithPayments for ClientBuilder {
    type Inner = ClientBuilder;

    fn with_payments(self, signer: Arc<dyn Signer>) -> ReqwestWithPaymentsBuilder<Self::Inner> {
        ReqwestWithPaymentsBuilder {
            inner: self,
            x402: X402Payments::new(signer),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::Address;
    use serde_json::json;

    use super::stub::{StubServer, challenge_body, json_response};
    use super::*;
    use crate::eth::{Eip712Domain, EvmSigner, TransferWithAuthorization};
    use crate::x402::types::PaymentPayload;

    fn signer() -> Arc<EvmSigner> {
        Arc::new(EvmSigner::from_hex(&format!("0x{}", "5a".repeat(32))).unwrap())
    }

    fn client(x402: X402Payments, stub: StubServer) -> ClientWithMiddleware {
        rqm::ClientBuilder::new(Client::new())
            .with(x402)
            .with(stub)
            .build()
    }

    fn downcast(err: rqm::Error) -> X402PaymentsError {
        match err {
            rqm::Error::Middleware(e) => e.downcast::<X402PaymentsError>().unwrap(),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_402_sends_once() {
        let (stub, handle) = StubServer::new(|_, _| json_response(200, &json!({"ok": true})));
        let http = client(X402Payments::new(signer()), stub);

        let res = http.get("http://paywalled.test/free").send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(handle.calls(), 1);
        assert!(handle.header(0, X_PAYMENT).is_none());
    }

    #[tokio::test]
    async fn test_pays_and_retries_once() {
        let (stub, handle) = StubServer::new(|i, req| {
            if i == 0 || req.headers().get(X_PAYMENT).is_none() {
                json_response(402, &challenge_body("1000"))
            } else {
                json_response(200, &json!({"weather": "sunny"}))
            }
        });
        let signer = signer();
        let http = client(X402Payments::new(signer.clone()), stub);

        let res = http.get("http://paywalled.test/weather").send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(handle.calls(), 2);

        let header = handle.header(1, X_PAYMENT).unwrap();
        let payload = PaymentPayload::from_header_value(&header).unwrap();
        let a = &payload.payload.authorization;
        let domain = Eip712Domain {
            name: "USDC".into(),
            version: "2".into(),
            chain_id: 84532,
            verifying_contract: Address::from_str("0x036CbD53842c5426634e7929541eC2318f3dCF7e")
                .unwrap(),
        };
        let transfer = TransferWithAuthorization {
            from: Address::from_str(&a.from).unwrap(),
            to: Address::from_str(&a.to).unwrap(),
            value: a.value.0,
            valid_after: a.valid_after.0,
            valid_before: a.valid_before.0,
            nonce: a.nonce.0,
        };
        let recovered = transfer
            .recover_signer(&domain, &payload.payload.signature)
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_second_402_is_payment_failed() {
        let (stub, handle) = StubServer::new(|i, _| {
            let mut body = challenge_body("1000");
            if i > 0 {
                body["error"] = json!("insufficient_funds");
            }
            json_response(402, &body)
        });
        let http = client(X402Payments::new(signer()), stub);

        let err = http.get("http://paywalled.test/weather").send().await.unwrap_err();
        match downcast(err) {
            X402PaymentsError::PaymentFailed { reason } => assert_eq!(reason, "insufficient_funds"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handle.calls(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_challenge_is_terminal() {
        let (stub, handle) = StubServer::new(|_, _| json_response(402, &json!({"hello": 1})));
        let http = client(X402Payments::new(signer()), stub);

        let err = http.get("http://paywalled.test/weather").send().await.unwrap_err();
        assert!(matches!(downcast(err), X402PaymentsError::ChallengeParse(_)));
        assert_eq!(handle.calls(), 1);
    }

    #[tokio::test]
    async fn test_max_amount_enforced() {
        let (stub, handle) = StubServer::new(|_, _| json_response(402, &challenge_body("5000000")));
        let http = client(
            X402Payments::new(signer()).max(TokenAmount::from(1_000_000)),
            stub,
        );

        let err = http.get("http://paywalled.test/weather").send().await.unwrap_err();
        assert!(matches!(
            downcast(err),
            X402PaymentsError::PaymentAmountTooLarge { .. }
        ));
        assert_eq!(handle.calls(), 1);
    }
}
