use solana_sdk::signature::Signature;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/**
 * Error codes raised by the bridge program during instruction execution.
 *
 * The ledger reports these through transaction logs; clients recover them by
 * scanning for the `Error Code: <Name>` marker the runtime prints. They are
 * terminal business-rule violations and must never be blindly retried.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramErrorCode {
    /**
     * The card id passed to create_card exceeds 32 bytes.
     *
     * How to handle: shorten the card id; ids are fixed at creation.
     */
    CardIdTooLong,

    /// The metadata string exceeds 256 bytes.
    MetadataTooLong,

    /**
     * The card has been deactivated.
     *
     * This error occurs when:
     * - A top_up_card or process_payment instruction targets a card whose
     *   is_active flag is false
     *
     * How to handle: the card lifecycle is one-way; issue a new card.
     */
    CardInactive,

    /// A top-up would push the escrow balance past the card's balance_limit.
    BalanceLimitExceeded,

    /**
     * The payment amount exceeds the card's current escrow balance.
     *
     * Advisory pre-checks reduce how often this reaches the ledger, but
     * concurrent spends can always outrun a stale mirror; the program is the
     * enforcing authority.
     */
    InsufficientBalance,

    /// The merchant reference exceeds 64 bytes.
    MerchantReferenceTooLong,

    /// withdraw_balance was attempted while the card is still active.
    CardStillActive,

    /// withdraw_balance was attempted on an empty escrow.
    NoBalanceToWithdraw,

    /// The logs did not carry a recognizable program error code.
    Unknown,
}

impl ProgramErrorCode {
    const ALL: [ProgramErrorCode; 8] = [
        ProgramErrorCode::CardIdTooLong,
        ProgramErrorCode::MetadataTooLong,
        ProgramErrorCode::CardInactive,
        ProgramErrorCode::BalanceLimitExceeded,
        ProgramErrorCode::InsufficientBalance,
        ProgramErrorCode::MerchantReferenceTooLong,
        ProgramErrorCode::CardStillActive,
        ProgramErrorCode::NoBalanceToWithdraw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProgramErrorCode::CardIdTooLong => "CardIdTooLong",
            ProgramErrorCode::MetadataTooLong => "MetadataTooLong",
            ProgramErrorCode::CardInactive => "CardInactive",
            ProgramErrorCode::BalanceLimitExceeded => "BalanceLimitExceeded",
            ProgramErrorCode::InsufficientBalance => "InsufficientBalance",
            ProgramErrorCode::MerchantReferenceTooLong => "MerchantReferenceTooLong",
            ProgramErrorCode::CardStillActive => "CardStillActive",
            ProgramErrorCode::NoBalanceToWithdraw => "NoBalanceToWithdraw",
            ProgramErrorCode::Unknown => "Unknown",
        }
    }

    /// Recovers a program error code from a log or status line.
    pub fn from_text(text: &str) -> Self {
        for code in Self::ALL {
            if text.contains(code.name()) {
                return code;
            }
        }
        ProgramErrorCode::Unknown
    }

    /// Recovers a program error code from a rejected transaction's logs.
    pub fn from_logs(logs: &[String]) -> Self {
        for line in logs {
            let code = Self::from_text(line);
            if code != ProgramErrorCode::Unknown {
                return code;
            }
        }
        ProgramErrorCode::Unknown
    }
}

impl std::fmt::Display for ProgramErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bad input caught before anything reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("card id must not be empty")]
    EmptyCardId,
    #[error("card id is too long ({len} bytes, max 32)")]
    CardIdTooLong { len: usize },
    #[error("metadata is too long ({len} bytes, max 256)")]
    MetadataTooLong { len: usize },
    #[error("merchant reference is too long ({len} bytes, max 64)")]
    MerchantReferenceTooLong { len: usize },
    #[error("amount must be greater than zero")]
    NonPositiveAmount,
    #[error("balance limit must be greater than zero")]
    NonPositiveBalanceLimit,
    #[error("card not found: {card_id}")]
    CardNotFound { card_id: String },
    #[error("merchant not found: {merchant_id}")]
    MerchantNotFound { merchant_id: String },
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },
}

/// Failures surfaced by the ledger client.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger refused the transaction outright (preflight or execution).
    #[error("transaction rejected by the ledger")]
    Rejected { logs: Vec<String> },

    /// The transaction landed but executed with an error.
    #[error("transaction failed after submission: {reason}")]
    Failed { reason: String },

    /// Confirmation was not observed within the deadline. The transaction may
    /// or may not have landed; callers decide whether to resubmit.
    #[error("timed out waiting for confirmation of {signature}")]
    Timeout { signature: Signature },

    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("subscription failure: {0}")]
    Subscription(String),
}

/// Failures talking to the custodial backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(String),
    #[error("backend returned status {status} for {path}")]
    Status { status: u16, path: String },
    #[error("duplicate merchant reference {merchant_reference:?} for card {card_id}")]
    DuplicateReference {
        card_id: String,
        merchant_reference: String,
    },
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Http(err.to_string())
    }
}

/// Best-effort notification channel failure. Never escalated past the
/// monitor's own logging.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

/**
 * The ledger write committed but the dependent backend write did not.
 *
 * Funds moved, so this is not a failure of the underlying operation; it is a
 * consistency gap. Carries everything the reconciliation path needs to retry
 * the backend write idempotently (the ledger signature doubles as the
 * idempotency key).
 */
#[derive(Debug, Clone, thiserror::Error)]
#[error("ledger committed {signature} but the backend write for card {card_id} failed: {detail}")]
pub struct Inconsistency {
    pub card_id: String,
    pub signature: Signature,
    pub detail: String,
}

/// Top-level error taxonomy for card operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Program-level business rule violation. Terminal; not retryable.
    #[error("ledger rejected transaction: {code}")]
    LedgerRejected {
        code: ProgramErrorCode,
        logs: Vec<String>,
    },

    /// Transport-level ledger failure. Retryable by the caller with a fresh
    /// blockhash; never silently retried here.
    #[error("ledger unavailable")]
    LedgerUnavailable {
        #[source]
        source: LedgerError,
    },

    /// Backend failure before any ledger write. Plain failure, nothing to
    /// reconcile.
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    BackendInconsistent(#[from] Inconsistency),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Classifies a ledger client failure into the caller-facing taxonomy.
    pub fn from_ledger(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected { logs } => {
                let code = ProgramErrorCode::from_logs(&logs);
                BridgeError::LedgerRejected { code, logs }
            }
            LedgerError::Failed { reason } => {
                let code = ProgramErrorCode::from_text(&reason);
                BridgeError::LedgerRejected {
                    code,
                    logs: vec![reason],
                }
            }
            other => BridgeError::LedgerUnavailable { source: other },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::LedgerUnavailable { .. })
    }
}
