use crate::events::{self, ProgramEvent};
use crate::ledger::{AccountChange, LogsEntry};

/// How the classification was reached. Structured payload decodes are exact;
/// marker matches on unstructured log text are best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    Heuristic,
}

/// A domain event derived from raw ledger output.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    CardCreated(events::CardCreated),
    CardToppedUp(events::CardToppedUp),
    PaymentProcessed(events::PaymentProcessed),
    CardDeactivated(events::CardDeactivated),
    BalanceWithdrawn(events::BalanceWithdrawn),
    /// An event name recognized in log text whose payload could not be
    /// decoded.
    Marker { name: &'static str },
    TransactionFailed { reason: String },
    AccountChanged { slot: u64, lamports: u64 },
    /// Unmatched entry. Recorded for audit, never dispatched.
    Unknown,
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::CardCreated(_) => "card_created",
            DomainEvent::CardToppedUp(_) => "card_topped_up",
            DomainEvent::PaymentProcessed(_) => "payment_processed",
            DomainEvent::CardDeactivated(_) => "card_deactivated",
            DomainEvent::BalanceWithdrawn(_) => "balance_withdrawn",
            DomainEvent::Marker { name } => marker_event_type(name),
            DomainEvent::TransactionFailed { .. } => "error",
            DomainEvent::AccountChanged { .. } => "account_change",
            DomainEvent::Unknown => "unknown",
        }
    }

    /// Whether side effects may fire for this event.
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, DomainEvent::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub event: DomainEvent,
    pub confidence: Confidence,
}

const MARKERS: [&str; 5] = [
    "CardCreated",
    "CardToppedUp",
    "PaymentProcessed",
    "CardDeactivated",
    "BalanceWithdrawn",
];

fn marker_event_type(name: &str) -> &'static str {
    match name {
        "CardCreated" => "card_created",
        "CardToppedUp" => "card_topped_up",
        "PaymentProcessed" => "payment_processed",
        "CardDeactivated" => "card_deactivated",
        "BalanceWithdrawn" => "balance_withdrawn",
        _ => "unknown",
    }
}

fn from_program_event(event: ProgramEvent) -> DomainEvent {
    match event {
        ProgramEvent::CardCreated(e) => DomainEvent::CardCreated(e),
        ProgramEvent::CardToppedUp(e) => DomainEvent::CardToppedUp(e),
        ProgramEvent::PaymentProcessed(e) => DomainEvent::PaymentProcessed(e),
        ProgramEvent::CardDeactivated(e) => DomainEvent::CardDeactivated(e),
        ProgramEvent::BalanceWithdrawn(e) => DomainEvent::BalanceWithdrawn(e),
    }
}

/**
 * Maps one transaction-log entry to zero or more domain events.
 *
 * Structured payloads (`Program data:` lines) are decoded by discriminator
 * and classify exactly. Plain log text falls back to marker matching, which
 * is best-effort against unstructured output. Entries matching nothing
 * classify as a single `Unknown`, which downstream keeps for audit but never
 * dispatches. Pure: no retries, no I/O.
 */
pub fn classify_logs(entry: &LogsEntry) -> Vec<Classified> {
    if let Some(reason) = &entry.err {
        return vec![Classified {
            event: DomainEvent::TransactionFailed {
                reason: reason.clone(),
            },
            confidence: Confidence::Exact,
        }];
    }

    let mut out = Vec::new();
    for line in &entry.logs {
        if let Some(event) = ProgramEvent::decode(line) {
            out.push(Classified {
                event: from_program_event(event),
                confidence: Confidence::Exact,
            });
            continue;
        }
        if line.starts_with(events::PROGRAM_DATA_PREFIX) {
            // Undecodable payload; fall through to Unknown handling below.
            continue;
        }
        if let Some(name) = MARKERS.iter().copied().find(|marker| line.contains(marker)) {
            out.push(Classified {
                event: DomainEvent::Marker { name },
                confidence: Confidence::Heuristic,
            });
        } else if line.contains("Error") {
            out.push(Classified {
                event: DomainEvent::TransactionFailed {
                    reason: line.clone(),
                },
                confidence: Confidence::Heuristic,
            });
        }
    }

    if out.is_empty() {
        out.push(Classified {
            event: DomainEvent::Unknown,
            confidence: Confidence::Heuristic,
        });
    }
    out
}

/// Maps an account-change notification to a dashboard-sync event. The diff
/// carries no instruction context, so this never tries to reconstruct what
/// happened; it relays what the ledger already committed.
pub fn classify_account_change(change: &AccountChange) -> Classified {
    Classified {
        event: DomainEvent::AccountChanged {
            slot: change.slot,
            lamports: change.lamports,
        },
        confidence: Confidence::Exact,
    }
}
