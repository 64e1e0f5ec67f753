use anchor_lang::solana_program::hash::hash;
use anchor_lang::{AnchorDeserialize, AnchorSerialize};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solana_sdk::pubkey::Pubkey;

/// Prefix the runtime puts in front of base64-encoded event payloads.
pub const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Computes the 8-byte discriminator for `event:<name>`.
pub fn event_discriminator(name: &str) -> [u8; 8] {
    let digest = hash(format!("event:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.to_bytes()[..8]);
    out
}

/**
 * Event emitted when a card is created.
 * Emitted by the create_card instruction.
 */
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
pub struct CardCreated {
    pub card_pubkey: Pubkey,
    pub owner: Pubkey,
    pub card_id: String,
    pub balance_limit: u64,
}

/**
 * Event emitted when funds land in a card's escrow.
 * Emitted by the top_up_card instruction.
 */
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
pub struct CardToppedUp {
    pub card_pubkey: Pubkey,
    pub amount: u64,
    pub new_balance: u64,
}

/**
 * Event emitted when a payment settles from escrow to a merchant.
 * Emitted by the process_payment instruction.
 *
 * Fields:
 * @field merchant_reference - Caller-supplied idempotency tag; the backend
 *        dedups on it, the ledger does not.
 */
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
pub struct PaymentProcessed {
    pub card_pubkey: Pubkey,
    pub merchant: Pubkey,
    pub amount: u64,
    pub merchant_reference: String,
    pub remaining_balance: u64,
    pub timestamp: i64,
}

/// Event emitted when a card is deactivated.
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
pub struct CardDeactivated {
    pub card_pubkey: Pubkey,
    pub timestamp: i64,
}

/// Event emitted when a deactivated card's escrow is emptied.
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
pub struct BalanceWithdrawn {
    pub card_pubkey: Pubkey,
    pub amount: u64,
    pub timestamp: i64,
}

/// Discriminator-prefixed borsh payload, base64-wrapped the way the runtime
/// prints emitted events.
pub trait EventData: AnchorSerialize + AnchorDeserialize + Sized {
    const NAME: &'static str;

    fn discriminator() -> [u8; 8] {
        event_discriminator(Self::NAME)
    }

    fn encode_log_line(&self) -> String {
        let mut payload = Vec::from(Self::discriminator());
        payload.extend_from_slice(self.try_to_vec().unwrap().as_ref());
        format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(payload))
    }
}

macro_rules! event_data {
    ($($ty:ident),* $(,)?) => {
        $(impl EventData for $ty {
            const NAME: &'static str = stringify!($ty);
        })*

        /// A decoded program event.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ProgramEvent {
            $($ty($ty),)*
        }

        impl ProgramEvent {
            /// Decodes one log line. `None` for anything that is not a
            /// well-formed event emitted by this program.
            pub fn decode(line: &str) -> Option<ProgramEvent> {
                let encoded = line.strip_prefix(PROGRAM_DATA_PREFIX)?;
                let payload = BASE64.decode(encoded.trim()).ok()?;
                if payload.len() < 8 {
                    return None;
                }
                let (disc, rest) = payload.split_at(8);
                $(if disc == $ty::discriminator() {
                    return $ty::try_from_slice(rest).ok().map(ProgramEvent::$ty);
                })*
                None
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(ProgramEvent::$ty(_) => stringify!($ty),)*
                }
            }
        }
    };
}

event_data!(
    CardCreated,
    CardToppedUp,
    PaymentProcessed,
    CardDeactivated,
    BalanceWithdrawn,
);
