use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use account_data_trait::AccountData;
use card_bridge::addresses;
use card_bridge::backend::{
    BackendCard, BackendClient, BalanceOperation, Merchant, PaymentHistoryQuery, PaymentRecord,
    PaymentStatus, RecordPaymentRequest, RegisterCardRequest,
};
use card_bridge::config::{BridgeConfig, RetryPolicy};
use card_bridge::errors::{BackendError, LedgerError, NotifyError, ProgramErrorCode};
use card_bridge::events::{
    BalanceWithdrawn, CardCreated, CardDeactivated, CardToppedUp, EventData, PaymentProcessed,
};
use card_bridge::instruction::{self as ix, args, instruction_discriminator};
use card_bridge::ledger::{AccountChange, LedgerClient, LogsEntry};
use card_bridge::notify::NotificationSink;
use card_bridge::orchestrator::{
    CardCreation, CardOrchestrator, CreateCardParams, PaymentParams, PaymentSettlement, TopUp,
    TopUpParams,
};
use card_bridge::state::{BridgeState, Card};
use card_bridge::AnchorDeserialize;

pub const TEST_USER: &str = "user-1";
pub const TEST_BALANCE_LIMIT: u64 = 1000;
const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/**
 * In-memory ledger implementing the program semantics the orchestrator
 * relies on: PDA account images, balance invariants, program error codes and
 * anchor-style event logs, delivered to subscribers the way the real
 * subscription would (at-least-once, per entry).
 */
pub struct MockLedger {
    program_id: Pubkey,
    state: Mutex<LedgerState>,
    log_subs: Mutex<Vec<UnboundedSender<LogsEntry>>>,
    account_subs: Mutex<Vec<(Pubkey, UnboundedSender<AccountChange>)>>,
    rpc_failures: AtomicU32,
}

struct LedgerState {
    slot: u64,
    accounts: HashMap<Pubkey, Vec<u8>>,
    token_balances: HashMap<Pubkey, u64>,
    confirmed: HashSet<Signature>,
}

struct Execution {
    logs: Vec<String>,
    changed: Vec<Pubkey>,
}

impl MockLedger {
    pub fn new(program_id: Pubkey) -> Self {
        let mut accounts = HashMap::new();
        // executable program account image, enough for existence probes
        accounts.insert(program_id, vec![2, 0, 0, 0]);
        Self {
            program_id,
            state: Mutex::new(LedgerState {
                slot: 1,
                accounts,
                token_balances: HashMap::new(),
                confirmed: HashSet::new(),
            }),
            log_subs: Mutex::new(Vec::new()),
            account_subs: Mutex::new(Vec::new()),
            rpc_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_next_submits(&self, count: u32) {
        self.rpc_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_token_balance(&self, account: Pubkey, amount: u64) {
        self.state
            .lock()
            .unwrap()
            .token_balances
            .insert(account, amount);
    }

    pub fn token_balance(&self, account: &Pubkey) -> u64 {
        *self
            .state
            .lock()
            .unwrap()
            .token_balances
            .get(account)
            .unwrap_or(&0)
    }

    pub fn card_state(&self, address: &Pubkey) -> Option<Card> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(address)
            .and_then(|data| Card::from_account_data(data))
    }

    pub fn bridge_state(&self) -> Option<BridgeState> {
        let address = addresses::bridge_state_address(&self.program_id).pubkey;
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&address)
            .and_then(|data| BridgeState::from_account_data(data))
    }

    /// Injects a raw log entry into the subscription stream, as if the
    /// ledger delivered it. Used to exercise monitor paths directly.
    pub fn publish_logs(&self, entry: LogsEntry) {
        let subs = self.log_subs.lock().unwrap();
        for sender in subs.iter() {
            let _ = sender.send(entry.clone());
        }
    }

    fn error_logs(&self, ix_name: &str, code: ProgramErrorCode) -> Vec<String> {
        vec![
            format!("Program {} invoke [1]", self.program_id),
            format!("Program log: Instruction: {ix_name}"),
            format!(
                "Program log: AnchorError occurred. Error Code: {}. Error Number: 6000.",
                code.name()
            ),
            format!("Program {} failed: custom program error", self.program_id),
        ]
    }

    fn success_logs(&self, ix_name: &str, event_line: Option<String>) -> Vec<String> {
        let mut logs = vec![
            format!("Program {} invoke [1]", self.program_id),
            format!("Program log: Instruction: {ix_name}"),
        ];
        if let Some(line) = event_line {
            logs.push(line);
        }
        logs.push(format!("Program {} success", self.program_id));
        logs
    }

    fn execute(&self, state: &mut LedgerState, tx: &Transaction) -> Result<Execution, Vec<String>> {
        let message = &tx.message;
        let compiled = message
            .instructions
            .first()
            .ok_or_else(|| vec!["Transaction has no instructions".to_string()])?;
        let keys: Vec<Pubkey> = compiled
            .accounts
            .iter()
            .map(|index| message.account_keys[*index as usize])
            .collect();
        let data = &compiled.data;
        if data.len() < 8 {
            return Err(vec!["invalid instruction data".to_string()]);
        }
        let disc: [u8; 8] = data[..8].try_into().unwrap();
        let payload = &data[8..];

        if disc == instruction_discriminator(args::Initialize::NAME) {
            let parsed = args::Initialize::try_from_slice(payload)
                .map_err(|_| vec!["invalid instruction data".to_string()])?;
            let bridge_key = keys[0];
            if state.accounts.contains_key(&bridge_key) {
                return Err(vec![format!(
                    "Allocate: account {bridge_key} already in use"
                )]);
            }
            let bridge = BridgeState {
                authority: parsed.authority,
                total_cards: 0,
                bump: addresses::bridge_state_address(&self.program_id).bump,
            };
            state.accounts.insert(bridge_key, bridge.account_data());
            return Ok(Execution {
                logs: self.success_logs("Initialize", None),
                changed: vec![bridge_key],
            });
        }

        if disc == instruction_discriminator(args::CreateCard::NAME) {
            let parsed = args::CreateCard::try_from_slice(payload)
                .map_err(|_| vec!["invalid instruction data".to_string()])?;
            let (card_key, escrow_key, bridge_key, owner) = (keys[0], keys[1], keys[2], keys[3]);
            if parsed.card_id.len() > 32 {
                return Err(self.error_logs("CreateCard", ProgramErrorCode::CardIdTooLong));
            }
            if parsed.metadata.len() > 256 {
                return Err(self.error_logs("CreateCard", ProgramErrorCode::MetadataTooLong));
            }
            if state.accounts.contains_key(&card_key) {
                return Err(vec![
                    format!("Program {} invoke [1]", self.program_id),
                    format!("Allocate: account {card_key} already in use"),
                    format!("Program {} failed", self.program_id),
                ]);
            }
            let mut bridge = state
                .accounts
                .get(&bridge_key)
                .and_then(|data| BridgeState::from_account_data(data))
                .ok_or_else(|| {
                    vec![
                        "Program log: AnchorError caused by account: bridge_state. \
                         Error Code: AccountNotInitialized."
                            .to_string(),
                    ]
                })?;
            let bump = addresses::card_address(&self.program_id, &owner, &parsed.card_id)
                .map(|pda| pda.bump)
                .unwrap_or_default();
            let card = Card {
                id: parsed.card_id.clone(),
                owner,
                balance: 0,
                balance_limit: parsed.balance_limit,
                is_active: true,
                metadata: parsed.metadata.clone(),
                created_at: GENESIS_TIMESTAMP + state.slot as i64,
                bump,
            };
            state.accounts.insert(card_key, card.account_data());
            state.token_balances.insert(escrow_key, 0);
            bridge.total_cards += 1;
            state.accounts.insert(bridge_key, bridge.account_data());
            let event = CardCreated {
                card_pubkey: card_key,
                owner,
                card_id: parsed.card_id,
                balance_limit: parsed.balance_limit,
            };
            return Ok(Execution {
                logs: self.success_logs("CreateCard", Some(event.encode_log_line())),
                changed: vec![card_key, bridge_key],
            });
        }

        if disc == instruction_discriminator(args::TopUpCard::NAME) {
            let parsed = args::TopUpCard::try_from_slice(payload)
                .map_err(|_| vec!["invalid instruction data".to_string()])?;
            let (card_key, escrow_key, user_token_key) = (keys[0], keys[1], keys[2]);
            let mut card = self.load_card(state, &card_key, "TopUpCard")?;
            if !card.is_active {
                return Err(self.error_logs("TopUpCard", ProgramErrorCode::CardInactive));
            }
            let user_balance = *state.token_balances.get(&user_token_key).unwrap_or(&0);
            if user_balance < parsed.amount {
                return Err(vec![
                    format!("Program {} invoke [1]", self.program_id),
                    "Program log: Error: insufficient funds".to_string(),
                    format!("Program {} failed", self.program_id),
                ]);
            }
            card.validate_top_up_and_update(parsed.amount)
                .map_err(|code| self.error_logs("TopUpCard", code))?;
            state
                .token_balances
                .insert(user_token_key, user_balance - parsed.amount);
            let escrow = state.token_balances.entry(escrow_key).or_insert(0);
            *escrow += parsed.amount;
            let event = CardToppedUp {
                card_pubkey: card_key,
                amount: parsed.amount,
                new_balance: card.balance,
            };
            state.accounts.insert(card_key, card.account_data());
            return Ok(Execution {
                logs: self.success_logs("TopUpCard", Some(event.encode_log_line())),
                changed: vec![card_key],
            });
        }

        if disc == instruction_discriminator(args::ProcessPayment::NAME) {
            let parsed = args::ProcessPayment::try_from_slice(payload)
                .map_err(|_| vec!["invalid instruction data".to_string()])?;
            let (card_key, escrow_key, merchant_token_key, merchant_key) =
                (keys[0], keys[1], keys[2], keys[3]);
            if parsed.merchant_reference.len() > 64 {
                return Err(self.error_logs(
                    "ProcessPayment",
                    ProgramErrorCode::MerchantReferenceTooLong,
                ));
            }
            let mut card = self.load_card(state, &card_key, "ProcessPayment")?;
            card.validate_payment_and_update(parsed.amount)
                .map_err(|code| self.error_logs("ProcessPayment", code))?;
            let escrow = state.token_balances.entry(escrow_key).or_insert(0);
            *escrow = escrow.saturating_sub(parsed.amount);
            let merchant_balance = state.token_balances.entry(merchant_token_key).or_insert(0);
            *merchant_balance += parsed.amount;
            let event = PaymentProcessed {
                card_pubkey: card_key,
                merchant: merchant_key,
                amount: parsed.amount,
                merchant_reference: parsed.merchant_reference,
                remaining_balance: card.balance,
                timestamp: GENESIS_TIMESTAMP + state.slot as i64,
            };
            state.accounts.insert(card_key, card.account_data());
            return Ok(Execution {
                logs: self.success_logs("ProcessPayment", Some(event.encode_log_line())),
                changed: vec![card_key],
            });
        }

        if disc == instruction_discriminator(args::DeactivateCard::NAME) {
            let card_key = keys[0];
            let mut card = self.load_card(state, &card_key, "DeactivateCard")?;
            card.deactivate();
            let event = CardDeactivated {
                card_pubkey: card_key,
                timestamp: GENESIS_TIMESTAMP + state.slot as i64,
            };
            state.accounts.insert(card_key, card.account_data());
            return Ok(Execution {
                logs: self.success_logs("DeactivateCard", Some(event.encode_log_line())),
                changed: vec![card_key],
            });
        }

        if disc == instruction_discriminator(args::WithdrawBalance::NAME) {
            let (card_key, escrow_key, user_token_key) = (keys[0], keys[1], keys[2]);
            let mut card = self.load_card(state, &card_key, "WithdrawBalance")?;
            let amount = card
                .validate_withdraw_and_update()
                .map_err(|code| self.error_logs("WithdrawBalance", code))?;
            let escrow = state.token_balances.entry(escrow_key).or_insert(0);
            *escrow = escrow.saturating_sub(amount);
            let user_balance = state.token_balances.entry(user_token_key).or_insert(0);
            *user_balance += amount;
            let event = BalanceWithdrawn {
                card_pubkey: card_key,
                amount,
                timestamp: GENESIS_TIMESTAMP + state.slot as i64,
            };
            state.accounts.insert(card_key, card.account_data());
            return Ok(Execution {
                logs: self.success_logs("WithdrawBalance", Some(event.encode_log_line())),
                changed: vec![card_key],
            });
        }

        Err(vec!["unknown instruction".to_string()])
    }

    fn load_card(
        &self,
        state: &LedgerState,
        card_key: &Pubkey,
        ix_name: &str,
    ) -> Result<Card, Vec<String>> {
        state
            .accounts
            .get(card_key)
            .and_then(|data| Card::from_account_data(data))
            .ok_or_else(|| {
                vec![format!(
                    "Program log: AnchorError caused by account: card. \
                     Error Code: AccountNotInitialized. Instruction: {ix_name}."
                )]
            })
    }

    fn broadcast(&self, entry: LogsEntry, changed: &[Pubkey], state: &LedgerState) {
        self.publish_logs(entry);
        let subs = self.account_subs.lock().unwrap();
        for key in changed {
            let data = state.accounts.get(key).cloned().unwrap_or_default();
            for (address, sender) in subs.iter() {
                if address == key || *address == self.program_id {
                    let _ = sender.send(AccountChange {
                        slot: state.slot,
                        lamports: 1_000_000,
                        owner: self.program_id,
                        data: data.clone(),
                    });
                }
            }
        }
    }
}

fn unbounded_stream<T: Send + 'static>(rx: UnboundedReceiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Ok(Hash::new_unique())
    }

    async fn submit(&self, transaction: Transaction) -> Result<Signature, LedgerError> {
        let pending = self.rpc_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.rpc_failures.store(pending - 1, Ordering::SeqCst);
            return Err(LedgerError::Rpc("injected rpc failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.slot += 1;
        match self.execute(&mut state, &transaction) {
            Ok(execution) => {
                let signature = transaction
                    .signatures
                    .first()
                    .copied()
                    .unwrap_or_else(Signature::new_unique);
                state.confirmed.insert(signature);
                let entry = LogsEntry {
                    signature: signature.to_string(),
                    slot: state.slot,
                    logs: execution.logs,
                    err: None,
                };
                self.broadcast(entry, &execution.changed, &state);
                Ok(signature)
            }
            Err(logs) => Err(LedgerError::Rejected { logs }),
        }
    }

    async fn confirm(&self, signature: &Signature) -> Result<(), LedgerError> {
        let state = self.state.lock().unwrap();
        if state.confirmed.contains(signature) {
            Ok(())
        } else {
            Err(LedgerError::Timeout {
                signature: *signature,
            })
        }
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }

    async fn subscribe_logs(
        &self,
        _program_id: &Pubkey,
    ) -> Result<BoxStream<'static, LogsEntry>, LedgerError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.log_subs.lock().unwrap().push(tx);
        Ok(unbounded_stream(rx))
    }

    async fn subscribe_account_changes(
        &self,
        address: &Pubkey,
    ) -> Result<BoxStream<'static, AccountChange>, LedgerError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.account_subs.lock().unwrap().push((*address, tx));
        Ok(unbounded_stream(rx))
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().unwrap().slot)
    }

    async fn get_health(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/**
 * In-memory custodial backend with signature-keyed idempotency and
 * scriptable failures, mirroring the REST surface the orchestrator consumes.
 */
pub struct MockBackend {
    state: Mutex<BackendState>,
}

#[derive(Default)]
struct BackendState {
    cards: HashMap<String, BackendCard>,
    merchants: HashMap<String, Merchant>,
    payments: Vec<PaymentRecord>,
    applied_signatures: HashSet<String>,
    register_failures: u32,
    balance_failures: u32,
    register_calls: u32,
    next_payment_id: u64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
        }
    }

    pub fn fail_next_registrations(&self, count: u32) {
        self.state.lock().unwrap().register_failures = count;
    }

    pub fn fail_next_balance_updates(&self, count: u32) {
        self.state.lock().unwrap().balance_failures = count;
    }

    pub fn insert_merchant(&self, merchant: Merchant) {
        self.state
            .lock()
            .unwrap()
            .merchants
            .insert(merchant.id.clone(), merchant);
    }

    pub fn card(&self, card_id: &str) -> Option<BackendCard> {
        self.state.lock().unwrap().cards.get(card_id).cloned()
    }

    pub fn cards(&self) -> Vec<BackendCard> {
        self.state.lock().unwrap().cards.values().cloned().collect()
    }

    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn register_call_count(&self) -> u32 {
        self.state.lock().unwrap().register_calls
    }

    /// Forces the mirrored balance out of sync with the chain, simulating a
    /// lagging mirror.
    pub fn set_card_balance(&self, card_id: &str, balance: u64) {
        if let Some(card) = self.state.lock().unwrap().cards.get_mut(card_id) {
            card.balance = balance;
        }
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn register_card(&self, request: &RegisterCardRequest) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.register_calls += 1;
        if state.register_failures > 0 {
            state.register_failures -= 1;
            return Err(BackendError::Http("injected backend failure".to_string()));
        }
        // idempotent on the create signature: a repeat is a no-op, never a
        // second record
        if state.applied_signatures.contains(&request.solana_signature) {
            return Ok(());
        }
        state
            .applied_signatures
            .insert(request.solana_signature.clone());
        state.cards.insert(
            request.card_id.clone(),
            BackendCard {
                card_id: request.card_id.clone(),
                user_id: request.user_id.clone(),
                solana_pubkey: request.solana_pubkey.clone(),
                escrow_pubkey: request.escrow_pubkey.clone(),
                balance_limit: request.balance_limit,
                balance: 0,
                is_active: true,
                metadata: request.metadata.clone(),
                created_at: "2026-01-01T00:00:00Z".to_string(),
            },
        );
        Ok(())
    }

    async fn get_card(
        &self,
        card_id: &str,
        user_id: &str,
    ) -> Result<Option<BackendCard>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cards
            .get(card_id)
            .filter(|card| card.user_id == user_id)
            .cloned())
    }

    async fn get_user_cards(&self, user_id: &str) -> Result<Vec<BackendCard>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cards
            .values()
            .filter(|card| card.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_card_balance(
        &self,
        card_id: &str,
        amount: u64,
        operation: BalanceOperation,
        signature: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.balance_failures > 0 {
            state.balance_failures -= 1;
            return Err(BackendError::Http("injected backend failure".to_string()));
        }
        if state.applied_signatures.contains(signature) {
            return Ok(());
        }
        state.applied_signatures.insert(signature.to_string());
        let card = state
            .cards
            .get_mut(card_id)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                path: format!("/v1/solana/cards/{card_id}/balance"),
            })?;
        card.balance = match operation {
            BalanceOperation::TopUp => card.balance + amount,
            BalanceOperation::Payment => card.balance.saturating_sub(amount),
        };
        Ok(())
    }

    async fn deactivate_card(&self, card_id: &str, signature: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.applied_signatures.contains(signature) {
            return Ok(());
        }
        state.applied_signatures.insert(signature.to_string());
        let card = state
            .cards
            .get_mut(card_id)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                path: format!("/v1/solana/cards/{card_id}/deactivate"),
            })?;
        card.is_active = false;
        Ok(())
    }

    async fn get_merchant(&self, merchant_id: &str) -> Result<Option<Merchant>, BackendError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .merchants
            .get(merchant_id)
            .cloned())
    }

    async fn record_payment(
        &self,
        request: &RecordPaymentRequest,
    ) -> Result<PaymentRecord, BackendError> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state.payments.iter().any(|payment| {
            payment.card_id == request.card_id
                && payment.merchant_reference == request.merchant_reference
        });
        if duplicate {
            return Err(BackendError::DuplicateReference {
                card_id: request.card_id.clone(),
                merchant_reference: request.merchant_reference.clone(),
            });
        }
        state.next_payment_id += 1;
        let payment = PaymentRecord {
            id: format!("pay-{}", state.next_payment_id),
            card_id: request.card_id.clone(),
            merchant_id: request.merchant_id.clone(),
            amount: request.amount,
            merchant_reference: request.merchant_reference.clone(),
            solana_signature: None,
            status: PaymentStatus::Pending,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        state.payments.push(payment.clone());
        Ok(payment)
    }

    async fn update_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        signature: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        let payment = state
            .payments
            .iter_mut()
            .find(|payment| payment.id == payment_id)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                path: format!("/v1/solana/payments/{payment_id}/status"),
            })?;
        payment.status = status;
        if let Some(signature) = signature {
            payment.solana_signature = Some(signature.to_string());
        }
        Ok(())
    }

    async fn get_payment_history(
        &self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentRecord>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter()
            .filter(|payment| match &query.card_id {
                Some(card_id) => payment.card_id == *card_id,
                None => true,
            })
            .skip(query.offset as usize)
            .take(query.limit.max(1) as usize)
            .cloned()
            .collect())
    }
}

/// Recording notification sink with scriptable webhook failures.
pub struct MockNotifier {
    webhooks: Mutex<Vec<(String, serde_json::Value)>>,
    dashboard: Mutex<Vec<(String, serde_json::Value)>>,
    webhook_failures: AtomicU32,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            webhooks: Mutex::new(Vec::new()),
            dashboard: Mutex::new(Vec::new()),
            webhook_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_next_webhooks(&self, count: u32) {
        self.webhook_failures.store(count, Ordering::SeqCst);
    }

    pub fn webhooks(&self) -> Vec<(String, serde_json::Value)> {
        self.webhooks.lock().unwrap().clone()
    }

    pub fn webhook_event_types(&self) -> Vec<String> {
        self.webhooks
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, payload)| payload["event_type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn dashboard_updates(&self) -> Vec<(String, serde_json::Value)> {
        self.dashboard.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for MockNotifier {
    async fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let pending = self.webhook_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.webhook_failures.store(pending - 1, Ordering::SeqCst);
            return Err(NotifyError::Webhook(
                "injected delivery failure".to_string(),
            ));
        }
        self.webhooks
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }

    async fn send_push(
        &self,
        _user_id: &str,
        _title: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn send_email(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn update_dashboard(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.dashboard
            .lock()
            .unwrap()
            .push((event_type.to_string(), payload.clone()));
        Ok(())
    }
}

pub struct Context {
    pub config: BridgeConfig,
    pub ledger: Arc<MockLedger>,
    pub backend: Arc<MockBackend>,
    pub orchestrator: CardOrchestrator,
    pub signer: Arc<Keypair>,
    pub mint: Pubkey,
}

pub fn setup() -> Context {
    let config = BridgeConfig {
        program_id: Pubkey::new_unique(),
        webhook_url: Some("https://hooks.example.com/bridge".to_string()),
        backend_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        notify_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        health_interval: Duration::from_millis(50),
        ..BridgeConfig::default()
    };
    let ledger = Arc::new(MockLedger::new(config.program_id));
    let backend = Arc::new(MockBackend::new());
    let signer = Arc::new(Keypair::new());
    let orchestrator =
        CardOrchestrator::new(&config, ledger.clone(), backend.clone(), signer.clone());
    Context {
        config,
        ledger,
        backend,
        orchestrator,
        signer,
        mint: Pubkey::new_unique(),
    }
}

/// Standard fixture: deployment initialized and ready for card operations.
pub async fn setup_and_initialize() -> Context {
    let ctx = setup();
    initialize_bridge(&ctx).await;
    ctx
}

pub async fn initialize_bridge(ctx: &Context) {
    let bridge_state = addresses::bridge_state_address(&ctx.config.program_id);
    let authority = ctx.signer.pubkey();
    let instruction = ix::create_initialize_instruction(
        &ctx.config.program_id,
        &ix::accounts::Initialize {
            bridge_state: bridge_state.pubkey,
            authority,
        },
        authority,
    );
    let blockhash = ctx.ledger.latest_blockhash().await.unwrap();
    let transaction = Transaction::new_signed_with_payer(
        &[instruction],
        Some(&authority),
        &[ctx.signer.as_ref()],
        blockhash,
    );
    let signature = ctx.ledger.submit(transaction).await.unwrap();
    ctx.ledger.confirm(&signature).await.unwrap();
}

pub fn card_address(ctx: &Context, card_id: &str) -> Pubkey {
    addresses::card_address(&ctx.config.program_id, &ctx.orchestrator.owner(), card_id)
        .unwrap()
        .pubkey
}

pub fn escrow_address(ctx: &Context, card: &Pubkey) -> Pubkey {
    addresses::escrow_address(&ctx.config.program_id, card).pubkey
}

pub fn owner_token_account(ctx: &Context) -> Pubkey {
    addresses::associated_token_address(&ctx.orchestrator.owner(), &ctx.mint)
}

/// Funds the owner's associated token account.
pub fn fund_owner(ctx: &Context, amount: u64) -> Pubkey {
    let ata = owner_token_account(ctx);
    ctx.ledger.set_token_balance(ata, amount);
    ata
}

pub fn add_merchant(ctx: &Context, merchant_id: &str) -> Merchant {
    let merchant = Merchant {
        id: merchant_id.to_string(),
        name: format!("Merchant {merchant_id}"),
        solana_pubkey: Pubkey::new_unique().to_string(),
        solana_token_account: Pubkey::new_unique().to_string(),
        is_active: true,
    };
    ctx.backend.insert_merchant(merchant.clone());
    merchant
}

pub fn create_card_params(ctx: &Context, card_id: &str) -> CreateCardParams {
    CreateCardParams {
        card_id: card_id.to_string(),
        user_id: TEST_USER.to_string(),
        balance_limit: TEST_BALANCE_LIMIT,
        metadata: "test".to_string(),
        mint: ctx.mint,
    }
}

pub async fn create_card(ctx: &Context, card_id: &str) -> CardCreation {
    ctx.orchestrator
        .create_card(create_card_params(ctx, card_id))
        .await
        .unwrap()
}

pub async fn top_up(ctx: &Context, card_id: &str, amount: u64) -> TopUp {
    ctx.orchestrator
        .top_up_card(TopUpParams {
            card_id: card_id.to_string(),
            user_id: TEST_USER.to_string(),
            amount,
            mint: ctx.mint,
        })
        .await
        .unwrap()
}

pub fn payment_params(
    card_id: &str,
    amount: u64,
    merchant_id: &str,
    merchant_reference: &str,
) -> PaymentParams {
    PaymentParams {
        card_id: card_id.to_string(),
        user_id: TEST_USER.to_string(),
        amount,
        merchant_id: merchant_id.to_string(),
        merchant_reference: merchant_reference.to_string(),
    }
}

pub async fn pay(
    ctx: &Context,
    card_id: &str,
    amount: u64,
    merchant_id: &str,
    merchant_reference: &str,
) -> PaymentSettlement {
    ctx.orchestrator
        .process_payment(payment_params(
            card_id,
            amount,
            merchant_id,
            merchant_reference,
        ))
        .await
        .unwrap()
}

pub fn onchain_card(ctx: &Context, card_id: &str) -> Option<Card> {
    ctx.ledger.card_state(&card_address(ctx, card_id))
}
