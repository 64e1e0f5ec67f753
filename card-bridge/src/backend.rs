use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Mirrored card record held by the custodial backend. `balance` converges to
/// the on-chain value but may lag behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCard {
    pub card_id: String,
    pub user_id: String,
    pub solana_pubkey: String,
    pub escrow_pubkey: String,
    pub balance_limit: u64,
    pub balance: u64,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub card_id: String,
    pub merchant_id: String,
    pub amount: u64,
    pub merchant_reference: String,
    #[serde(default)]
    pub solana_signature: Option<String>,
    pub status: PaymentStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub id: String,
    pub name: String,
    pub solana_pubkey: String,
    pub solana_token_account: String,
    pub is_active: bool,
}

/// Which way a balance mutation moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceOperation {
    TopUp,
    Payment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCardRequest {
    pub card_id: String,
    pub user_id: String,
    pub solana_pubkey: String,
    pub escrow_pubkey: String,
    pub balance_limit: u64,
    #[serde(default)]
    pub metadata: Option<String>,
    /// Ledger signature of the create transaction; the backend dedups
    /// registrations on it.
    pub solana_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
    pub card_id: String,
    pub user_id: String,
    pub merchant_id: String,
    pub amount: u64,
    pub merchant_reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryQuery {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/**
 * REST surface of the custodial backend.
 *
 * Every operation that mutates a balance carries the ledger signature of the
 * transaction that justified it; the backend treats that signature as an
 * idempotency key, so reconciliation can retry any of these calls without
 * double-applying.
 */
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn register_card(&self, request: &RegisterCardRequest) -> Result<(), BackendError>;

    async fn get_card(
        &self,
        card_id: &str,
        user_id: &str,
    ) -> Result<Option<BackendCard>, BackendError>;

    async fn get_user_cards(&self, user_id: &str) -> Result<Vec<BackendCard>, BackendError>;

    async fn update_card_balance(
        &self,
        card_id: &str,
        amount: u64,
        operation: BalanceOperation,
        signature: &str,
    ) -> Result<(), BackendError>;

    async fn deactivate_card(&self, card_id: &str, signature: &str) -> Result<(), BackendError>;

    async fn get_merchant(&self, merchant_id: &str) -> Result<Option<Merchant>, BackendError>;

    /// Creates a pending payment record. Duplicate `merchant_reference` for
    /// the same card is flagged with [`BackendError::DuplicateReference`],
    /// never silently reprocessed.
    async fn record_payment(
        &self,
        request: &RecordPaymentRequest,
    ) -> Result<PaymentRecord, BackendError>;

    async fn update_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        signature: Option<&str>,
    ) -> Result<(), BackendError>;

    async fn get_payment_history(
        &self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentRecord>, BackendError>;
}

/// `BackendClient` over HTTP with bearer auth.
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(path: &str, response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(BackendError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            })
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn register_card(&self, request: &RegisterCardRequest) -> Result<(), BackendError> {
        let path = "/v1/solana/cards";
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Self::check(path, response).await?;
        tracing::info!(card_id = %request.card_id, "card registered in backend");
        Ok(())
    }

    async fn get_card(
        &self,
        card_id: &str,
        user_id: &str,
    ) -> Result<Option<BackendCard>, BackendError> {
        let path = format!("/v1/solana/cards/{card_id}");
        let response = self
            .client
            .get(self.url(&path))
            .bearer_auth(&self.api_key)
            .query(&[("userId", user_id)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(&path, response).await?;
        let card = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(card))
    }

    async fn get_user_cards(&self, user_id: &str) -> Result<Vec<BackendCard>, BackendError> {
        let path = "/v1/solana/cards";
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .query(&[("userId", user_id)])
            .send()
            .await?;
        let response = Self::check(path, response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn update_card_balance(
        &self,
        card_id: &str,
        amount: u64,
        operation: BalanceOperation,
        signature: &str,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/solana/cards/{card_id}/balance");
        let body = serde_json::json!({
            "amount": amount,
            "operation": operation,
            "solanaSignature": signature,
        });
        let response = self
            .client
            .patch(self.url(&path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(&path, response).await?;
        tracing::info!(card_id, amount, ?operation, "card balance updated in backend");
        Ok(())
    }

    async fn deactivate_card(&self, card_id: &str, signature: &str) -> Result<(), BackendError> {
        let path = format!("/v1/solana/cards/{card_id}/deactivate");
        let body = serde_json::json!({ "solanaSignature": signature });
        let response = self
            .client
            .patch(self.url(&path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(&path, response).await?;
        tracing::info!(card_id, "card deactivated in backend");
        Ok(())
    }

    async fn get_merchant(&self, merchant_id: &str) -> Result<Option<Merchant>, BackendError> {
        let path = format!("/v1/merchants/{merchant_id}");
        let response = self
            .client
            .get(self.url(&path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(&path, response).await?;
        let merchant = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(merchant))
    }

    async fn record_payment(
        &self,
        request: &RecordPaymentRequest,
    ) -> Result<PaymentRecord, BackendError> {
        let path = "/v1/solana/payments";
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        // The backend answers 409 when the reference was already used for
        // this card.
        if response.status() == StatusCode::CONFLICT {
            return Err(BackendError::DuplicateReference {
                card_id: request.card_id.clone(),
                merchant_reference: request.merchant_reference.clone(),
            });
        }
        let response = Self::check(path, response).await?;
        let payment: PaymentRecord = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        tracing::info!(payment_id = %payment.id, card_id = %request.card_id, "payment recorded in backend");
        Ok(payment)
    }

    async fn update_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        signature: Option<&str>,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/solana/payments/{payment_id}/status");
        let body = serde_json::json!({
            "status": status,
            "solanaSignature": signature,
        });
        let response = self
            .client
            .patch(self.url(&path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(&path, response).await?;
        tracing::info!(payment_id, ?status, "payment status updated in backend");
        Ok(())
    }

    async fn get_payment_history(
        &self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentRecord>, BackendError> {
        let path = "/v1/solana/payments";
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        let response = Self::check(path, response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}
