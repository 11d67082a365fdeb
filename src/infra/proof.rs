//! HTTP client for the on-chain proof recording bridge.
//!
//! The bridge is a best-effort collaborator: the payment service invokes it
//! after a confirmed settlement, logs whatever happens, and moves on. Nothing
//! here may influence payment status or webhook delivery.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{
    AppError, ExternalServiceError, Payment, ProofRecorder,
};

/// Static configuration for the proof bridge, built once at process start
/// and read-only thereafter.
#[derive(Clone)]
pub struct ProofBridgeConfig {
    /// Notarization service base URL
    pub endpoint_url: String,
    /// Chain the proof contract lives on
    pub chain_id: u64,
    /// Proof contract address
    pub contract_address: String,
    /// Bearer token for the notarization service
    pub api_key: Option<SecretString>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ProofBridgeConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:8545/proofs".to_string(),
            chain_id: 1,
            contract_address: String::new(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
    /// Opaque reference to the recorded proof (e.g. a transaction hash)
    proof_reference: Option<String>,
}

/// Proof recorder talking to an HTTP notarization service.
pub struct HttpProofRecorder {
    config: ProofBridgeConfig,
    http_client: reqwest::Client,
}

impl HttpProofRecorder {
    pub fn new(config: ProofBridgeConfig) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl ProofRecorder for HttpProofRecorder {
    async fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/health", self.config.endpoint_url.trim_end_matches('/'));
        let response = self.http_client.get(&url).send().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
        })?;
        if !response.status().is_success() {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("Proof bridge returned {}", response.status()),
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn record_proof(&self, payment: &Payment) -> Result<Option<String>, AppError> {
        if !self.is_eligible(payment) {
            debug!("Payment not eligible for proof recording");
            return Ok(None);
        }

        let body = serde_json::json!({
            "chainId": self.config.chain_id,
            "contractAddress": self.config.contract_address,
            "paymentId": payment.id,
            "txHash": payment.tx_hash,
            "amount": payment.amount,
            "currency": payment.currency,
        });

        let mut request = self
            .http_client
            .post(&self.config.endpoint_url)
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ExternalService(ExternalServiceError::Timeout(e.to_string()))
            } else {
                AppError::ExternalService(ExternalServiceError::Unavailable(e.to_string()))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ExternalService(ExternalServiceError::Protocol(
                format!("Proof bridge returned {status}"),
            )));
        }

        let parsed: ProofResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::Protocol(e.to_string()))
        })?;

        Ok(parsed.proof_reference)
    }
}

/// Stand-in used when no proof bridge is configured. Reports healthy and
/// records nothing, so confirmed transitions behave identically either way.
pub struct NoopProofRecorder;

#[async_trait]
impl ProofRecorder for NoopProofRecorder {
    async fn record_proof(&self, _payment: &Payment) -> Result<Option<String>, AppError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaymentStatus;
    use rust_decimal_macros::dec;

    fn recorder() -> HttpProofRecorder {
        HttpProofRecorder::new(ProofBridgeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_ineligible_payment_short_circuits() {
        // Created payment without a tx hash never reaches the network
        let payment = Payment::new(
            "pay_1".to_string(),
            "merchant_1".to_string(),
            dec!(100.00),
            "USDC".to_string(),
        );
        let result = recorder().record_proof(&payment).await.unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_eligibility_rules() {
        let recorder = recorder();
        let mut payment = Payment::new(
            "pay_1".to_string(),
            "merchant_1".to_string(),
            dec!(100.00),
            "USDC".to_string(),
        );
        assert!(!recorder.is_eligible(&payment));

        payment.status = PaymentStatus::Confirmed;
        assert!(!recorder.is_eligible(&payment), "needs a tx hash");

        payment.tx_hash = Some("0xabc".to_string());
        assert!(recorder.is_eligible(&payment));
    }
}
