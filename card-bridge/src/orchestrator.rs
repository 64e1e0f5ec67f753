use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::addresses;
use crate::backend::{
    BackendCard, BackendClient, BalanceOperation, PaymentHistoryQuery, PaymentRecord,
    PaymentStatus, RecordPaymentRequest, RegisterCardRequest,
};
use crate::config::BridgeConfig;
use crate::errors::{
    BackendError, BridgeError, Inconsistency, Result, ValidationError,
};
use crate::instruction as ix;
use crate::ledger::LedgerClient;
use crate::state::{BridgeState, Card, MAX_MERCHANT_REFERENCE_LEN, MAX_METADATA_LEN};
use account_data_trait::AccountData;

/**
 * Card lifecycle orchestration across the ledger and the custodial backend.
 *
 * Every operation is a two-phase sequence: one ledger transaction, then,
 * only once that transaction is confirmed, one backend mutation. The order
 * is fixed because only the ledger write is authoritative and
 * reversible-by-omission: if it fails, nothing happened anywhere. A backend
 * failure after ledger success is not a failure of the operation (funds
 * moved); it surfaces as a degraded outcome that the reconciliation path
 * retries using the ledger signature as the idempotency key.
 *
 * Operations on different cards run fully in parallel. Operations on the
 * same card are serialized through an advisory per-card lock so concurrent
 * submissions do not race each other on a stale balance pre-check; the
 * ledger remains the enforcing authority regardless.
 */
pub struct CardOrchestrator {
    ledger: Arc<dyn LedgerClient>,
    backend: Arc<dyn BackendClient>,
    signer: Arc<Keypair>,
    program_id: Pubkey,
    card_locks: Mutex<HashMap<(Pubkey, String), Arc<Mutex<()>>>>,
}

/// Whether the backend mirror was brought in line with the ledger.
#[derive(Debug, Clone)]
pub enum BackendSync {
    Applied,
    /// Ledger committed; the mirror write did not land. Self-heals through
    /// reconciliation or an explicit retry.
    Degraded(Inconsistency),
}

impl BackendSync {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BackendSync::Degraded(_))
    }
}

#[derive(Debug)]
pub struct CardCreation {
    pub card_id: String,
    pub card_address: Pubkey,
    pub escrow_address: Pubkey,
    pub signature: Signature,
    pub backend: BackendSync,
}

#[derive(Debug)]
pub struct TopUp {
    pub card_id: String,
    pub amount: u64,
    pub signature: Signature,
    pub backend: BackendSync,
}

#[derive(Debug)]
pub struct PaymentSettlement {
    pub payment_id: String,
    pub card_id: String,
    pub amount: u64,
    pub signature: Signature,
    pub backend: BackendSync,
}

#[derive(Debug)]
pub struct Deactivation {
    pub card_id: String,
    pub signature: Signature,
    pub backend: BackendSync,
}

#[derive(Debug)]
pub struct Withdrawal {
    pub card_id: String,
    pub amount: u64,
    pub signature: Signature,
}

#[derive(Debug, Clone)]
pub struct CreateCardParams {
    pub card_id: String,
    pub user_id: String,
    pub balance_limit: u64,
    pub metadata: String,
    pub mint: Pubkey,
}

#[derive(Debug, Clone)]
pub struct TopUpParams {
    pub card_id: String,
    pub user_id: String,
    pub amount: u64,
    pub mint: Pubkey,
}

#[derive(Debug, Clone)]
pub struct PaymentParams {
    pub card_id: String,
    pub user_id: String,
    pub amount: u64,
    pub merchant_id: String,
    pub merchant_reference: String,
}

impl CardOrchestrator {
    pub fn new(
        config: &BridgeConfig,
        ledger: Arc<dyn LedgerClient>,
        backend: Arc<dyn BackendClient>,
        signer: Arc<Keypair>,
    ) -> Self {
        Self {
            ledger,
            backend,
            signer,
            program_id: config.program_id,
            card_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The custodial owner identity cards are derived from and signed with.
    pub fn owner(&self) -> Pubkey {
        self.signer.pubkey()
    }

    async fn lock_card(&self, card_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.card_locks.lock().await;
            locks
                .entry((self.owner(), card_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn submit_and_confirm(
        &self,
        instructions: &[solana_sdk::instruction::Instruction],
    ) -> Result<Signature> {
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(BridgeError::from_ledger)?;
        let owner = self.owner();
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&owner),
            &[self.signer.as_ref()],
            blockhash,
        );
        let signature = self
            .ledger
            .submit(transaction)
            .await
            .map_err(BridgeError::from_ledger)?;
        self.ledger
            .confirm(&signature)
            .await
            .map_err(BridgeError::from_ledger)?;
        Ok(signature)
    }

    /// Runs a phase-two backend write on a detached task. Cancelling the
    /// caller after the ledger write has been confirmed must not abandon the
    /// mirror write, so the write runs to completion regardless of whether
    /// anyone is still awaiting it.
    async fn guarded<F>(&self, card_id: &str, signature: Signature, write: F) -> BackendSync
    where
        F: Future<Output = std::result::Result<(), BackendError>> + Send + 'static,
    {
        match tokio::spawn(write).await {
            Ok(Ok(())) => BackendSync::Applied,
            Ok(Err(err)) => {
                tracing::warn!(card_id, %signature, error = %err, "backend write failed after ledger commit");
                BackendSync::Degraded(Inconsistency {
                    card_id: card_id.to_string(),
                    signature,
                    detail: err.to_string(),
                })
            }
            Err(join_err) => {
                tracing::error!(card_id, %signature, error = %join_err, "backend write task failed");
                BackendSync::Degraded(Inconsistency {
                    card_id: card_id.to_string(),
                    signature,
                    detail: join_err.to_string(),
                })
            }
        }
    }

    /**
     * Creates a card and its escrow on the ledger, then registers the card
     * with the backend.
     *
     * Duplicate creation for the same `(owner, card_id)` is rejected by the
     * program itself (the account already exists); that rejection is
     * forwarded, never second-guessed here. Registration uses account state
     * fetched back from the ledger rather than locally derived values, so a
     * deriver/version mismatch cannot propagate into the backend.
     */
    pub async fn create_card(&self, params: CreateCardParams) -> Result<CardCreation> {
        addresses::validate_card_id(&params.card_id)?;
        if params.balance_limit == 0 {
            return Err(ValidationError::NonPositiveBalanceLimit.into());
        }
        if params.metadata.len() > MAX_METADATA_LEN {
            return Err(ValidationError::MetadataTooLong {
                len: params.metadata.len(),
            }
            .into());
        }

        let _guard = self.lock_card(&params.card_id).await;

        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, &params.card_id)?;
        let escrow = addresses::escrow_address(&self.program_id, &card.pubkey);
        let bridge_state = addresses::bridge_state_address(&self.program_id);

        let instruction = ix::create_create_card_instruction(
            &self.program_id,
            &ix::accounts::CreateCard {
                card: card.pubkey,
                card_escrow_account: escrow.pubkey,
                bridge_state: bridge_state.pubkey,
                owner,
                mint: params.mint,
            },
            params.card_id.clone(),
            params.balance_limit,
            params.metadata.clone(),
        );

        let signature = self.submit_and_confirm(&[instruction]).await?;
        tracing::info!(card_id = %params.card_id, %signature, "card created on ledger");

        let backend = self.guarded(
            &params.card_id,
            signature,
            register_from_ledger(
                self.ledger.clone(),
                self.backend.clone(),
                card.pubkey,
                escrow.pubkey,
                params.card_id.clone(),
                params.user_id.clone(),
                signature,
            ),
        )
        .await;

        Ok(CardCreation {
            card_id: params.card_id,
            card_address: card.pubkey,
            escrow_address: escrow.pubkey,
            signature,
            backend,
        })
    }

    /**
     * Retries the backend registration of a card whose create transaction
     * already committed. Idempotent: the backend dedups on the ledger
     * signature, so repeating this produces exactly one card record.
     */
    pub async fn retry_registration(
        &self,
        card_id: &str,
        user_id: &str,
        signature: Signature,
    ) -> Result<()> {
        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, card_id)?;
        let escrow = addresses::escrow_address(&self.program_id, &card.pubkey);
        let sync = self
            .guarded(
                card_id,
                signature,
                register_from_ledger(
                    self.ledger.clone(),
                    self.backend.clone(),
                    card.pubkey,
                    escrow.pubkey,
                    card_id.to_string(),
                    user_id.to_string(),
                    signature,
                ),
            )
            .await;
        match sync {
            BackendSync::Applied => Ok(()),
            BackendSync::Degraded(inconsistency) => Err(inconsistency.into()),
        }
    }

    /// Moves `amount` base units from the owner's token account into the
    /// card's escrow, then mirrors the new balance into the backend.
    pub async fn top_up_card(&self, params: TopUpParams) -> Result<TopUp> {
        addresses::validate_card_id(&params.card_id)?;
        if params.amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }

        let _guard = self.lock_card(&params.card_id).await;

        // Ownership pre-check against the mirror; activity and limit are the
        // ledger's call.
        self.backend
            .get_card(&params.card_id, &params.user_id)
            .await?
            .ok_or(ValidationError::CardNotFound {
                card_id: params.card_id.clone(),
            })?;

        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, &params.card_id)?;
        let escrow = addresses::escrow_address(&self.program_id, &card.pubkey);
        let user_token_account = addresses::associated_token_address(&owner, &params.mint);

        let instruction = ix::create_top_up_card_instruction(
            &self.program_id,
            &ix::accounts::TopUpCard {
                card: card.pubkey,
                card_escrow_account: escrow.pubkey,
                user_token_account,
                owner,
            },
            params.amount,
        );

        let signature = self.submit_and_confirm(&[instruction]).await?;
        tracing::info!(card_id = %params.card_id, amount = params.amount, %signature, "card topped up on ledger");

        let backend_client = self.backend.clone();
        let card_id = params.card_id.clone();
        let amount = params.amount;
        let signature_str = signature.to_string();
        let backend = self
            .guarded(&params.card_id, signature, async move {
                backend_client
                    .update_card_balance(&card_id, amount, BalanceOperation::TopUp, &signature_str)
                    .await
            })
            .await;

        Ok(TopUp {
            card_id: params.card_id,
            amount: params.amount,
            signature,
            backend,
        })
    }

    /**
     * Pays a merchant from a card's escrow.
     *
     * A payment record is created `pending` before submission and finalized
     * once the ledger answers; the ledger transaction is the sole source of
     * truth for whether funds moved. The balance pre-check is advisory only:
     * a concurrent spend can always invalidate it, in which case the program
     * rejects with InsufficientBalance and the record is finalized `failed`
     * with no balance mutation anywhere.
     */
    pub async fn process_payment(&self, params: PaymentParams) -> Result<PaymentSettlement> {
        addresses::validate_card_id(&params.card_id)?;
        if params.amount == 0 {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if params.merchant_reference.len() > MAX_MERCHANT_REFERENCE_LEN {
            return Err(ValidationError::MerchantReferenceTooLong {
                len: params.merchant_reference.len(),
            }
            .into());
        }

        let _guard = self.lock_card(&params.card_id).await;

        let card_record = self
            .backend
            .get_card(&params.card_id, &params.user_id)
            .await?
            .ok_or(ValidationError::CardNotFound {
                card_id: params.card_id.clone(),
            })?;
        if card_record.balance < params.amount {
            return Err(ValidationError::InsufficientBalance {
                requested: params.amount,
                available: card_record.balance,
            }
            .into());
        }

        let merchant = self
            .backend
            .get_merchant(&params.merchant_id)
            .await?
            .ok_or(ValidationError::MerchantNotFound {
                merchant_id: params.merchant_id.clone(),
            })?;
        let merchant_pubkey = parse_pubkey(&merchant.solana_pubkey)?;
        let merchant_token_account = parse_pubkey(&merchant.solana_token_account)?;

        // Recorded before submission; duplicate references are flagged here
        // and never reach the ledger.
        let pending = self
            .backend
            .record_payment(&RecordPaymentRequest {
                card_id: params.card_id.clone(),
                user_id: params.user_id.clone(),
                merchant_id: params.merchant_id.clone(),
                amount: params.amount,
                merchant_reference: params.merchant_reference.clone(),
            })
            .await?;

        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, &params.card_id)?;
        let escrow = addresses::escrow_address(&self.program_id, &card.pubkey);

        let instruction = ix::create_process_payment_instruction(
            &self.program_id,
            &ix::accounts::ProcessPayment {
                card: card.pubkey,
                card_escrow_account: escrow.pubkey,
                merchant_token_account,
                merchant: merchant_pubkey,
                owner,
            },
            params.amount,
            params.merchant_reference.clone(),
        );

        match self.submit_and_confirm(&[instruction]).await {
            Ok(signature) => {
                tracing::info!(
                    card_id = %params.card_id,
                    payment_id = %pending.id,
                    amount = params.amount,
                    %signature,
                    "payment processed on ledger"
                );
                let backend_client = self.backend.clone();
                let card_id = params.card_id.clone();
                let payment_id = pending.id.clone();
                let amount = params.amount;
                let signature_str = signature.to_string();
                let backend = self
                    .guarded(&params.card_id, signature, async move {
                        backend_client
                            .update_card_balance(
                                &card_id,
                                amount,
                                BalanceOperation::Payment,
                                &signature_str,
                            )
                            .await?;
                        backend_client
                            .update_payment_status(
                                &payment_id,
                                PaymentStatus::Completed,
                                Some(&signature_str),
                            )
                            .await
                    })
                    .await;
                Ok(PaymentSettlement {
                    payment_id: pending.id,
                    card_id: params.card_id,
                    amount: params.amount,
                    signature,
                    backend,
                })
            }
            Err(err @ BridgeError::LedgerRejected { .. }) => {
                // Terminal rejection: no funds moved, finalize the record.
                let backend_client = self.backend.clone();
                let payment_id = pending.id.clone();
                tokio::spawn(async move {
                    if let Err(status_err) = backend_client
                        .update_payment_status(&payment_id, PaymentStatus::Failed, None)
                        .await
                    {
                        tracing::warn!(%payment_id, error = %status_err, "could not finalize rejected payment");
                    }
                });
                Err(err)
            }
            // Outcome unknown (timeout / rpc failure): the record stays
            // pending until confirmation or failure is actually observed.
            Err(err) => Err(err),
        }
    }

    /// Deactivates a card on the ledger, then flips the backend flag. The
    /// transition is one-way; subsequent top-ups and payments fail at the
    /// ledger with CardInactive, which is forwarded untouched.
    pub async fn deactivate_card(&self, card_id: &str, user_id: &str) -> Result<Deactivation> {
        addresses::validate_card_id(card_id)?;

        let _guard = self.lock_card(card_id).await;

        self.backend
            .get_card(card_id, user_id)
            .await?
            .ok_or(ValidationError::CardNotFound {
                card_id: card_id.to_string(),
            })?;

        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, card_id)?;
        let instruction = ix::create_deactivate_card_instruction(
            &self.program_id,
            &ix::accounts::DeactivateCard {
                card: card.pubkey,
                owner,
            },
        );

        let signature = self.submit_and_confirm(&[instruction]).await?;
        tracing::info!(card_id, %signature, "card deactivated on ledger");

        let backend_client = self.backend.clone();
        let card_id_owned = card_id.to_string();
        let signature_str = signature.to_string();
        let backend = self
            .guarded(card_id, signature, async move {
                backend_client
                    .deactivate_card(&card_id_owned, &signature_str)
                    .await
            })
            .await;

        Ok(Deactivation {
            card_id: card_id.to_string(),
            signature,
            backend,
        })
    }

    /**
     * Withdraws the full remaining escrow balance of a deactivated card to
     * the owner's token account. The program enforces that the card is
     * inactive and the escrow non-empty. No backend mutation follows; the
     * returned signature is the record of the withdrawal.
     */
    pub async fn withdraw_balance(&self, card_id: &str, mint: &Pubkey) -> Result<Withdrawal> {
        addresses::validate_card_id(card_id)?;

        let _guard = self.lock_card(card_id).await;

        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, card_id)?;
        let amount = self
            .get_card(card_id)
            .await?
            .ok_or(ValidationError::CardNotFound {
                card_id: card_id.to_string(),
            })?
            .balance;

        let escrow = addresses::escrow_address(&self.program_id, &card.pubkey);
        let user_token_account = addresses::associated_token_address(&owner, mint);
        let instruction = ix::create_withdraw_balance_instruction(
            &self.program_id,
            &ix::accounts::WithdrawBalance {
                card: card.pubkey,
                card_escrow_account: escrow.pubkey,
                user_token_account,
                owner,
            },
        );

        let signature = self.submit_and_confirm(&[instruction]).await?;
        tracing::info!(card_id, amount, %signature, "balance withdrawn on ledger");

        Ok(Withdrawal {
            card_id: card_id.to_string(),
            amount,
            signature,
        })
    }

    /// Fetches the authoritative card state from the ledger. `None` when the
    /// account does not exist or does not parse as a card.
    pub async fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        let owner = self.owner();
        let card = addresses::card_address(&self.program_id, &owner, card_id)?;
        let Some(data) = self
            .ledger
            .get_account(&card.pubkey)
            .await
            .map_err(BridgeError::from_ledger)?
        else {
            return Ok(None);
        };
        let parsed = Card::from_account_data(&data);
        if parsed.is_none() {
            tracing::warn!(card_id, address = %card.pubkey, "account exists but is not a card");
        }
        Ok(parsed)
    }

    /// Fetches the deployment's bridge state from the ledger.
    pub async fn get_bridge_state(&self) -> Result<Option<BridgeState>> {
        let bridge_state = addresses::bridge_state_address(&self.program_id);
        let Some(data) = self
            .ledger
            .get_account(&bridge_state.pubkey)
            .await
            .map_err(BridgeError::from_ledger)?
        else {
            return Ok(None);
        };
        Ok(BridgeState::from_account_data(&data))
    }

    pub async fn get_user_cards(&self, user_id: &str) -> Result<Vec<BackendCard>> {
        Ok(self.backend.get_user_cards(user_id).await?)
    }

    pub async fn get_payment_history(
        &self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentRecord>> {
        Ok(self.backend.get_payment_history(query).await?)
    }
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    value
        .parse()
        .map_err(|_| BackendError::Decode(format!("invalid pubkey in backend record: {value}")).into())
}

/// Registers a created card with the backend, sourcing the registered fields
/// from the account the ledger actually committed rather than local
/// derivation. Keyed by the create signature so repeats are no-ops.
fn register_from_ledger(
    ledger: Arc<dyn LedgerClient>,
    backend: Arc<dyn BackendClient>,
    card_address: Pubkey,
    escrow_address: Pubkey,
    card_id: String,
    user_id: String,
    signature: Signature,
) -> impl Future<Output = std::result::Result<(), BackendError>> + Send + 'static {
    async move {
        let data = ledger
            .get_account(&card_address)
            .await
            .map_err(|e| BackendError::Http(format!("card verification read failed: {e}")))?
            .ok_or_else(|| {
                BackendError::Http(format!("card account {card_address} not found on ledger"))
            })?;
        let card = Card::from_account_data(&data).ok_or_else(|| {
            BackendError::Decode(format!("account {card_address} did not parse as a card"))
        })?;
        if card.id != card_id {
            return Err(BackendError::Decode(format!(
                "account {card_address} holds card {:?}, expected {card_id:?}",
                card.id
            )));
        }
        backend
            .register_card(&RegisterCardRequest {
                card_id,
                user_id,
                solana_pubkey: card_address.to_string(),
                escrow_pubkey: escrow_address.to_string(),
                balance_limit: card.balance_limit,
                metadata: if card.metadata.is_empty() {
                    None
                } else {
                    Some(card.metadata.clone())
                },
                solana_signature: signature.to_string(),
            })
            .await
    }
}
