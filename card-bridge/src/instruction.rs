use anchor_lang::solana_program::hash::hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

/// SPL token program, fixed for every deployment.
pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
/// Associated token account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Computes the 8-byte discriminator for `global:<name>`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = hash(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.to_bytes()[..8]);
    out
}

/// Borsh argument payloads, discriminator-prefixed the way the program's
/// dispatcher expects them.
pub mod args {
    use anchor_lang::{AnchorDeserialize, AnchorSerialize};
    use solana_sdk::pubkey::Pubkey;

    use super::instruction_discriminator;

    macro_rules! instruction_args {
        ($($name:literal => $ty:ident { $($field:ident: $fty:ty),* $(,)? }),* $(,)?) => {
            $(
                #[derive(Debug, Clone, PartialEq, AnchorSerialize, AnchorDeserialize)]
                pub struct $ty {
                    $(pub $field: $fty,)*
                }

                impl $ty {
                    pub const NAME: &'static str = $name;

                    pub fn data(&self) -> Vec<u8> {
                        let mut data = Vec::from(instruction_discriminator(Self::NAME));
                        data.extend_from_slice(self.try_to_vec().unwrap().as_ref());
                        data
                    }
                }
            )*
        };
    }

    instruction_args!(
        "initialize" => Initialize { authority: Pubkey },
        "create_card" => CreateCard { card_id: String, balance_limit: u64, metadata: String },
        "top_up_card" => TopUpCard { amount: u64 },
        "process_payment" => ProcessPayment { amount: u64, merchant_reference: String },
        "deactivate_card" => DeactivateCard {},
        "withdraw_balance" => WithdrawBalance {},
    );
}

/// Ordered account lists for each instruction, exactly as the program's
/// account contexts declare them.
pub mod accounts {
    use solana_sdk::pubkey::Pubkey;

    pub struct Initialize {
        pub bridge_state: Pubkey,
        pub authority: Pubkey,
    }

    pub struct CreateCard {
        pub card: Pubkey,
        pub card_escrow_account: Pubkey,
        pub bridge_state: Pubkey,
        pub owner: Pubkey,
        pub mint: Pubkey,
    }

    pub struct TopUpCard {
        pub card: Pubkey,
        pub card_escrow_account: Pubkey,
        pub user_token_account: Pubkey,
        pub owner: Pubkey,
    }

    pub struct ProcessPayment {
        pub card: Pubkey,
        pub card_escrow_account: Pubkey,
        pub merchant_token_account: Pubkey,
        pub merchant: Pubkey,
        pub owner: Pubkey,
    }

    pub struct DeactivateCard {
        pub card: Pubkey,
        pub owner: Pubkey,
    }

    pub struct WithdrawBalance {
        pub card: Pubkey,
        pub card_escrow_account: Pubkey,
        pub user_token_account: Pubkey,
        pub owner: Pubkey,
    }
}

pub fn create_initialize_instruction(
    program_id: &Pubkey,
    accounts: &accounts::Initialize,
    authority: Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.bridge_state, false),
            AccountMeta::new(accounts.authority, true),
            AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
        ],
        data: args::Initialize { authority }.data(),
    }
}

pub fn create_create_card_instruction(
    program_id: &Pubkey,
    accounts: &accounts::CreateCard,
    card_id: String,
    balance_limit: u64,
    metadata: String,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.card, false),
            AccountMeta::new(accounts.card_escrow_account, false),
            AccountMeta::new(accounts.bridge_state, false),
            AccountMeta::new(accounts.owner, true),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(ASSOCIATED_TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(solana_sdk::system_program::ID, false),
            AccountMeta::new_readonly(solana_sdk::sysvar::rent::ID, false),
        ],
        data: args::CreateCard {
            card_id,
            balance_limit,
            metadata,
        }
        .data(),
    }
}

pub fn create_top_up_card_instruction(
    program_id: &Pubkey,
    accounts: &accounts::TopUpCard,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.card, false),
            AccountMeta::new(accounts.card_escrow_account, false),
            AccountMeta::new(accounts.user_token_account, false),
            AccountMeta::new(accounts.owner, true),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: args::TopUpCard { amount }.data(),
    }
}

pub fn create_process_payment_instruction(
    program_id: &Pubkey,
    accounts: &accounts::ProcessPayment,
    amount: u64,
    merchant_reference: String,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.card, false),
            AccountMeta::new(accounts.card_escrow_account, false),
            AccountMeta::new(accounts.merchant_token_account, false),
            AccountMeta::new_readonly(accounts.merchant, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: args::ProcessPayment {
            amount,
            merchant_reference,
        }
        .data(),
    }
}

pub fn create_deactivate_card_instruction(
    program_id: &Pubkey,
    accounts: &accounts::DeactivateCard,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.card, false),
            AccountMeta::new_readonly(accounts.owner, true),
        ],
        data: args::DeactivateCard {}.data(),
    }
}

pub fn create_withdraw_balance_instruction(
    program_id: &Pubkey,
    accounts: &accounts::WithdrawBalance,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.card, false),
            AccountMeta::new(accounts.card_escrow_account, false),
            AccountMeta::new(accounts.user_token_account, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: args::WithdrawBalance {}.data(),
    }
}
