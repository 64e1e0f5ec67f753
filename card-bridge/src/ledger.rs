use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter,
};
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::BridgeConfig;
use crate::errors::LedgerError;

/// One entry from the transaction-log stream. Repeats are possible; consumers
/// deduplicate on `(signature, slot)`.
#[derive(Debug, Clone)]
pub struct LogsEntry {
    pub signature: String,
    pub slot: u64,
    pub logs: Vec<String>,
    pub err: Option<String>,
}

/// One entry from the account-change stream.
#[derive(Debug, Clone)]
pub struct AccountChange {
    pub slot: u64,
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

/**
 * Thin async interface over the external ledger.
 *
 * Confirmation semantics: `submit` returns once the ledger has accepted the
 * transaction for processing; `confirm` resolves once it has reached the
 * configured commitment, or reports the execution error. Submission is never
 * retried internally: a financial transaction resubmitted blindly risks
 * duplication, so retry decisions stay with the caller.
 */
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    async fn submit(&self, transaction: Transaction) -> Result<Signature, LedgerError>;

    async fn confirm(&self, signature: &Signature) -> Result<(), LedgerError>;

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    async fn subscribe_logs(
        &self,
        program_id: &Pubkey,
    ) -> Result<BoxStream<'static, LogsEntry>, LedgerError>;

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<BoxStream<'static, AccountChange>, LedgerError>;

    async fn get_slot(&self) -> Result<u64, LedgerError>;

    async fn get_health(&self) -> Result<(), LedgerError>;
}

/// `LedgerClient` over JSON-RPC and the pubsub websocket.
pub struct RpcLedgerClient {
    rpc: RpcClient,
    ws_url: String,
    commitment: CommitmentConfig,
    confirm_timeout: Duration,
}

impl RpcLedgerClient {
    pub fn new(config: &BridgeConfig) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            rpc: RpcClient::new_with_commitment(config.rpc_url.clone(), commitment),
            ws_url: config.ws_url.clone(),
            commitment,
            confirm_timeout: config.confirm_timeout,
        }
    }

    async fn pubsub(&self) -> Result<PubsubClient, LedgerError> {
        PubsubClient::new(&self.ws_url)
            .await
            .map_err(|e| LedgerError::Subscription(e.to_string()))
    }
}

fn classify_client_error(err: solana_client::client_error::ClientError) -> LedgerError {
    use solana_client::client_error::ClientErrorKind;
    use solana_client::rpc_request::{RpcError, RpcResponseErrorData};

    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            data: RpcResponseErrorData::SendTransactionPreflightFailure(result),
            ..
        }) => LedgerError::Rejected {
            logs: result.logs.clone().unwrap_or_default(),
        },
        ClientErrorKind::TransactionError(tx_err) => LedgerError::Rejected {
            logs: vec![tx_err.to_string()],
        },
        _ => LedgerError::Rpc(err.to_string()),
    }
}

/// Adapts a channel receiver into an owned stream, detaching subscription
/// lifetimes from the pubsub connection that produced them.
fn channel_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.rpc
            .get_latest_blockhash()
            .await
            .map_err(classify_client_error)
    }

    async fn submit(&self, transaction: Transaction) -> Result<Signature, LedgerError> {
        self.rpc
            .send_transaction(&transaction)
            .await
            .map_err(classify_client_error)
    }

    async fn confirm(&self, signature: &Signature) -> Result<(), LedgerError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let response = self
                .rpc
                .get_signature_statuses(&[*signature])
                .await
                .map_err(classify_client_error)?;
            if let Some(status) = response.value.into_iter().next().flatten() {
                if let Some(err) = status.err {
                    return Err(LedgerError::Failed {
                        reason: err.to_string(),
                    });
                }
                if status.satisfies_commitment(self.commitment) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::Timeout {
                    signature: *signature,
                });
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(classify_client_error)?;
        Ok(response.value.map(|account| account.data))
    }

    async fn subscribe_logs(
        &self,
        program_id: &Pubkey,
    ) -> Result<BoxStream<'static, LogsEntry>, LedgerError> {
        let client = self.pubsub().await?;
        let filter = RpcTransactionLogsFilter::Mentions(vec![program_id.to_string()]);
        let config = RpcTransactionLogsConfig {
            commitment: Some(self.commitment),
        };
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let subscription = client.logs_subscribe(filter, config).await;
            let (mut stream, _unsubscribe) = match subscription {
                Ok(subscription) => subscription,
                Err(err) => {
                    tracing::warn!(error = %err, "log subscription failed");
                    return;
                }
            };
            while let Some(response) = stream.next().await {
                let entry = LogsEntry {
                    signature: response.value.signature,
                    slot: response.context.slot,
                    logs: response.value.logs,
                    err: response.value.err.map(|e| e.to_string()),
                };
                if tx.send(entry).await.is_err() {
                    break;
                }
            }
        });
        Ok(channel_stream(rx))
    }

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<BoxStream<'static, AccountChange>, LedgerError> {
        let client = self.pubsub().await?;
        let address = *address;
        let config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.commitment),
            ..RpcAccountInfoConfig::default()
        };
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let subscription = client.account_subscribe(&address, Some(config)).await;
            let (mut stream, _unsubscribe) = match subscription {
                Ok(subscription) => subscription,
                Err(err) => {
                    tracing::warn!(error = %err, "account subscription failed");
                    return;
                }
            };
            while let Some(response) = stream.next().await {
                let Some(account) = response.value.decode::<Account>() else {
                    continue;
                };
                let change = AccountChange {
                    slot: response.context.slot,
                    lamports: account.lamports,
                    owner: account.owner,
                    data: account.data,
                };
                if tx.send(change).await.is_err() {
                    break;
                }
            }
        });
        Ok(channel_stream(rx))
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        self.rpc.get_slot().await.map_err(classify_client_error)
    }

    async fn get_health(&self) -> Result<(), LedgerError> {
        self.rpc.get_health().await.map_err(classify_client_error)
    }
}
