use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::classifier::{classify_account_change, classify_logs, Classified, DomainEvent};
use crate::config::BridgeConfig;
use crate::ledger::{AccountChange, LedgerClient, LogsEntry};
use crate::notify::NotificationSink;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Bounded FIFO set of recently-seen `(signature, slot)` pairs. The ledger
/// subscription delivers at-least-once, so repeats must be dropped before
/// side effects fire twice. Old keys age out at capacity, which bounds memory
/// across an unbounded stream.
struct DedupWindow {
    capacity: usize,
    seen: HashSet<(String, u64)>,
    order: VecDeque<(String, u64)>,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns false when the key was already present.
    fn insert(&mut self, signature: &str, slot: u64) -> bool {
        let key = (signature.to_string(), slot);
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Running counters for coarse health reporting and audit.
#[derive(Debug, Default, Clone)]
pub struct MonitorStats {
    pub log_entries: u64,
    pub account_changes: u64,
    pub duplicates_dropped: u64,
    pub events_dispatched: u64,
    pub notifications_failed: u64,
    pub unknown_entries: u64,
}

/**
 * Long-running reconciliation process, independent of the request path.
 *
 * Consumes the program's transaction-log and account-change streams,
 * deduplicates, classifies entries into domain events and drives
 * notifications with bounded retry. It never mutates card or payment
 * records: it relays what the ledger already committed, it does not
 * re-derive amounts. Gaps across restarts are tolerated; this is a
 * best-effort side channel, not the system of record.
 */
pub struct ReconciliationMonitor {
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn NotificationSink>,
    config: BridgeConfig,
    seen: Mutex<DedupWindow>,
    stats: Mutex<MonitorStats>,
}

impl ReconciliationMonitor {
    pub fn new(
        config: BridgeConfig,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let seen = Mutex::new(DedupWindow::new(config.dedup_capacity));
        Self {
            ledger,
            notifier,
            config,
            seen,
            stats: Mutex::new(MonitorStats::default()),
        }
    }

    pub async fn stats(&self) -> MonitorStats {
        self.stats.lock().await.clone()
    }

    /// Runs until the shutdown signal flips to true. Subscription drops are
    /// survived by resubscribing; a failed resubscription is retried on the
    /// next health tick rather than tearing the monitor down.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(program_id = %self.config.program_id, "reconciliation monitor starting");
        let mut logs = self.try_subscribe_logs().await;
        let mut accounts = self.try_subscribe_accounts().await;
        let mut health = tokio::time::interval(self.config.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                entry = next_or_pending(&mut logs) => match entry {
                    Some(entry) => self.handle_logs_entry(entry).await,
                    None => {
                        tracing::warn!("log stream ended; resubscribing");
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        logs = self.try_subscribe_logs().await;
                    }
                },
                change = next_or_pending(&mut accounts) => match change {
                    Some(change) => self.handle_account_change(change).await,
                    None => {
                        tracing::warn!("account stream ended; resubscribing");
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        accounts = self.try_subscribe_accounts().await;
                    }
                },
                _ = health.tick() => {
                    self.health_check().await;
                    if logs.is_none() {
                        logs = self.try_subscribe_logs().await;
                    }
                    if accounts.is_none() {
                        accounts = self.try_subscribe_accounts().await;
                    }
                }
            }
        }
        let stats = self.stats().await;
        tracing::info!(?stats, "reconciliation monitor stopped");
    }

    async fn try_subscribe_logs(&self) -> Option<BoxStream<'static, LogsEntry>> {
        match self.ledger.subscribe_logs(&self.config.program_id).await {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(error = %err, "log subscription unavailable");
                None
            }
        }
    }

    async fn try_subscribe_accounts(&self) -> Option<BoxStream<'static, AccountChange>> {
        match self
            .ledger
            .subscribe_account_changes(&self.config.program_id)
            .await
        {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(error = %err, "account subscription unavailable");
                None
            }
        }
    }

    /// Processes one log entry: dedup, classify, dispatch.
    pub async fn handle_logs_entry(&self, entry: LogsEntry) {
        {
            let mut stats = self.stats.lock().await;
            stats.log_entries += 1;
        }
        let fresh = {
            let mut seen = self.seen.lock().await;
            seen.insert(&entry.signature, entry.slot)
        };
        if !fresh {
            let mut stats = self.stats.lock().await;
            stats.duplicates_dropped += 1;
            tracing::debug!(signature = %entry.signature, slot = entry.slot, "duplicate entry dropped");
            return;
        }

        for classified in classify_logs(&entry) {
            self.dispatch(&entry.signature, entry.slot, classified).await;
        }
    }

    /// Processes one account-change notification. These carry no signature,
    /// so they bypass dedup and only drive the dashboard-sync channel.
    pub async fn handle_account_change(&self, change: AccountChange) {
        {
            let mut stats = self.stats.lock().await;
            stats.account_changes += 1;
        }
        let classified = classify_account_change(&change);
        let payload = serde_json::json!({
            "event_type": classified.event.event_type(),
            "slot": change.slot,
            "lamports": change.lamports,
            "owner": change.owner.to_string(),
            "data_length": change.data.len(),
        });
        if let Err(err) = self
            .notifier
            .update_dashboard(classified.event.event_type(), &payload)
            .await
        {
            tracing::warn!(error = %err, "dashboard update failed");
        }
    }

    async fn dispatch(&self, signature: &str, slot: u64, classified: Classified) {
        if !classified.event.is_dispatchable() {
            let mut stats = self.stats.lock().await;
            stats.unknown_entries += 1;
            tracing::debug!(signature, slot, "unclassified entry recorded for audit");
            return;
        }

        let payload = webhook_payload(signature, slot, &classified);
        let event_type = classified.event.event_type();

        if let Err(err) = self.notifier.update_dashboard(event_type, &payload).await {
            tracing::warn!(event_type, error = %err, "dashboard update failed");
        }

        let delivered = self.deliver_webhook(event_type, &payload).await;
        let mut stats = self.stats.lock().await;
        if delivered {
            stats.events_dispatched += 1;
        } else {
            stats.notifications_failed += 1;
        }
    }

    /// Delivers a webhook with the configured bounded retry. Permanent
    /// failure is logged and the event dropped; this channel never queues
    /// without bound.
    async fn deliver_webhook(&self, event_type: &str, payload: &serde_json::Value) -> bool {
        let Some(url) = &self.config.webhook_url else {
            return true;
        };
        let policy = self.config.notify_retry;
        for attempt in 1..=policy.max_attempts {
            match self.notifier.send_webhook(url, payload).await {
                Ok(()) => return true,
                Err(err) => {
                    tracing::warn!(event_type, attempt, error = %err, "webhook delivery failed");
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.delay(attempt)).await;
                    }
                }
            }
        }
        tracing::error!(event_type, "webhook delivery exhausted retries; dropping event");
        false
    }

    /// Fixed-interval probe: program account existence, cluster health,
    /// current slot. A failed probe is reported and retried next tick; it
    /// never stops the monitor.
    pub async fn health_check(&self) {
        match self.ledger.get_account(&self.config.program_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::error!(program_id = %self.config.program_id, "program account not found");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "health check failed");
                return;
            }
        }
        if let Err(err) = self.ledger.get_health().await {
            tracing::warn!(error = %err, "cluster health degraded");
            return;
        }
        match self.ledger.get_slot().await {
            Ok(slot) => tracing::info!(slot, "health check passed"),
            Err(err) => tracing::error!(error = %err, "health check failed"),
        }
    }
}

async fn next_or_pending<T>(stream: &mut Option<BoxStream<'static, T>>) -> Option<T> {
    match stream {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

fn webhook_payload(signature: &str, slot: u64, classified: &Classified) -> serde_json::Value {
    let event_type = classified.event.event_type();
    let (title, description) = match event_type {
        "card_created" => (
            "New Virtual Card Created",
            "A new virtual card has been created on the bridge",
        ),
        "card_topped_up" => (
            "Card Topped Up",
            "A virtual card has been topped up with funds",
        ),
        "payment_processed" => (
            "Payment Processed",
            "A payment has been processed through the bridge",
        ),
        "card_deactivated" => ("Card Deactivated", "A virtual card has been deactivated"),
        "balance_withdrawn" => (
            "Balance Withdrawn",
            "The remaining card balance has been withdrawn",
        ),
        "error" => ("Bridge Error Detected", "Error in bridge operation"),
        _ => ("Bridge Event", "Observed bridge activity"),
    };
    let mut payload = serde_json::json!({
        "event_type": event_type,
        "signature": signature,
        "slot": slot,
        "title": title,
        "description": description,
    });
    if let Some(details) = event_details(&classified.event) {
        payload["data"] = details;
    }
    if let DomainEvent::TransactionFailed { .. } = classified.event {
        payload["severity"] = "high".into();
    }
    payload
}

fn event_details(event: &DomainEvent) -> Option<serde_json::Value> {
    match event {
        DomainEvent::CardCreated(e) => Some(serde_json::json!({
            "card_pubkey": e.card_pubkey.to_string(),
            "owner": e.owner.to_string(),
            "card_id": e.card_id,
            "balance_limit": e.balance_limit,
        })),
        DomainEvent::CardToppedUp(e) => Some(serde_json::json!({
            "card_pubkey": e.card_pubkey.to_string(),
            "amount": e.amount,
            "new_balance": e.new_balance,
        })),
        DomainEvent::PaymentProcessed(e) => Some(serde_json::json!({
            "card_pubkey": e.card_pubkey.to_string(),
            "merchant": e.merchant.to_string(),
            "amount": e.amount,
            "merchant_reference": e.merchant_reference,
            "remaining_balance": e.remaining_balance,
            "timestamp": e.timestamp,
        })),
        DomainEvent::CardDeactivated(e) => Some(serde_json::json!({
            "card_pubkey": e.card_pubkey.to_string(),
            "timestamp": e.timestamp,
        })),
        DomainEvent::BalanceWithdrawn(e) => Some(serde_json::json!({
            "card_pubkey": e.card_pubkey.to_string(),
            "amount": e.amount,
            "timestamp": e.timestamp,
        })),
        DomainEvent::TransactionFailed { reason } => {
            Some(serde_json::json!({ "reason": reason }))
        }
        DomainEvent::AccountChanged { slot, lamports } => Some(serde_json::json!({
            "slot": slot,
            "lamports": lamports,
        })),
        DomainEvent::Marker { .. } | DomainEvent::Unknown => None,
    }
}
