use solana_sdk::pubkey::Pubkey;

use crate::errors::{Result, ValidationError};

/// Seed tag for card accounts: `[CARD_SEED, owner, card_id]`.
pub const CARD_SEED: &[u8] = b"card";
/// Seed tag for escrow token accounts: `[ESCROW_SEED, card]`.
pub const ESCROW_SEED: &[u8] = b"escrow";
/// Seed tag for the singleton bridge state: `[BRIDGE_STATE_SEED]`.
pub const BRIDGE_STATE_SEED: &[u8] = b"bridge_state";

/// Maximum card id length in bytes, enforced by the program at creation.
pub const MAX_CARD_ID_LEN: usize = 32;

pub struct PdaWithBump {
    pub pubkey: Pubkey,
    pub bump: u8,
}

fn make_pda(seeds: &[&[u8]], program_id: &Pubkey) -> PdaWithBump {
    let (pda, bump) = Pubkey::find_program_address(seeds, program_id);
    PdaWithBump { pubkey: pda, bump }
}

/// Checks a card id against the program's creation constraints.
pub fn validate_card_id(card_id: &str) -> Result<()> {
    if card_id.is_empty() {
        return Err(ValidationError::EmptyCardId.into());
    }
    if card_id.len() > MAX_CARD_ID_LEN {
        return Err(ValidationError::CardIdTooLong {
            len: card_id.len(),
        }
        .into());
    }
    Ok(())
}

/**
 * Derives the card account address for `(owner, card_id)`.
 *
 * Seeds are a fixed tag, the owner's raw 32-byte identity, then the exact
 * card-id bytes. Because the owner component has fixed width, distinct
 * `(owner, card_id)` pairs can never collapse onto the same seed
 * concatenation.
 */
pub fn card_address(program_id: &Pubkey, owner: &Pubkey, card_id: &str) -> Result<PdaWithBump> {
    validate_card_id(card_id)?;
    Ok(make_pda(
        &[CARD_SEED, owner.as_ref(), card_id.as_bytes()],
        program_id,
    ))
}

/// Derives the escrow token account address backing a card.
pub fn escrow_address(program_id: &Pubkey, card: &Pubkey) -> PdaWithBump {
    make_pda(&[ESCROW_SEED, card.as_ref()], program_id)
}

/// Derives the singleton bridge state address for a deployment.
pub fn bridge_state_address(program_id: &Pubkey) -> PdaWithBump {
    make_pda(&[BRIDGE_STATE_SEED], program_id)
}

/// Derives the canonical associated token account for `(owner, mint)`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[
            owner.as_ref(),
            crate::instruction::TOKEN_PROGRAM_ID.as_ref(),
            mint.as_ref(),
        ],
        &crate::instruction::ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}
