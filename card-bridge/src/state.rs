use account_data_macro_derive::AccountData;
use account_data_trait::AccountData;
use anchor_lang::{AnchorDeserialize, AnchorSerialize};
use solana_sdk::pubkey::Pubkey;

use crate::errors::ProgramErrorCode;

/// Maximum metadata length in bytes, enforced by the program at creation.
pub const MAX_METADATA_LEN: usize = 256;
/// Maximum merchant reference length in bytes.
pub const MAX_MERCHANT_REFERENCE_LEN: usize = 64;

/**
 * The global state of the bridge program.
 *
 * Created once at initialization; total_cards increases by one per card
 * creation and never decreases.
 */
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize, AccountData)]
pub struct BridgeState {
    // Privileged identity allowed to administer the deployment
    pub authority: Pubkey,
    // Monotonically increasing card counter
    pub total_cards: u64,
    // Bump seed used in PDA derivation
    pub bump: u8,
}

/**
 * On-chain image of a virtual card.
 *
 * The escrow token account derived from this account's address holds the
 * funds backing `balance`. The program maintains
 * `0 <= balance <= balance_limit` across every accepted instruction; mirrors
 * of this value elsewhere converge to it but may lag.
 *
 * Lifecycle: created active, deactivated exactly once, emptied via withdrawal
 * only after deactivation.
 */
#[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize, AccountData)]
pub struct Card {
    pub id: String,
    pub owner: Pubkey,
    pub balance: u64,
    pub balance_limit: u64,
    pub is_active: bool,
    pub metadata: String,
    pub created_at: i64,
    // Bump seed used in PDA derivation
    pub bump: u8,
}

impl Card {
    /// Replays the program's top-up checks, then applies the new balance.
    pub fn validate_top_up_and_update(&mut self, amount: u64) -> Result<u64, ProgramErrorCode> {
        if !self.is_active {
            return Err(ProgramErrorCode::CardInactive);
        }
        let new_balance = self
            .balance
            .checked_add(amount)
            .ok_or(ProgramErrorCode::BalanceLimitExceeded)?;
        if new_balance > self.balance_limit {
            return Err(ProgramErrorCode::BalanceLimitExceeded);
        }
        self.balance = new_balance;
        Ok(self.balance)
    }

    /// Replays the program's payment checks, then debits the balance.
    pub fn validate_payment_and_update(&mut self, amount: u64) -> Result<u64, ProgramErrorCode> {
        if !self.is_active {
            return Err(ProgramErrorCode::CardInactive);
        }
        if self.balance < amount {
            return Err(ProgramErrorCode::InsufficientBalance);
        }
        self.balance -= amount;
        Ok(self.balance)
    }

    /// Replays the program's withdrawal checks, empties the escrow balance
    /// and returns the amount withdrawn.
    pub fn validate_withdraw_and_update(&mut self) -> Result<u64, ProgramErrorCode> {
        if self.is_active {
            return Err(ProgramErrorCode::CardStillActive);
        }
        if self.balance == 0 {
            return Err(ProgramErrorCode::NoBalanceToWithdraw);
        }
        let withdrawn = self.balance;
        self.balance = 0;
        Ok(withdrawn)
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}
