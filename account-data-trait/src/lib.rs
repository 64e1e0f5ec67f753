use anchor_lang::solana_program::hash::hash;
use borsh::{BorshDeserialize, BorshSerialize};

/// Discriminator-prefixed account (de)serialization for program accounts.
///
/// Account data is laid out as an 8-byte discriminator derived from
/// `account:<Name>` followed by the borsh encoding of the struct. Off-chain
/// code needs both directions: parsing bytes fetched over RPC and building
/// account images for test ledgers.
pub trait AccountData: BorshSerialize + BorshDeserialize {
    /// Account name the discriminator is derived from.
    const NAME: &'static str;

    fn discriminator() -> [u8; 8] {
        let digest = hash(format!("account:{}", Self::NAME).as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest.to_bytes()[..8]);
        out
    }

    fn account_data(&self) -> Vec<u8> {
        let mut data = Vec::from(Self::discriminator());
        data.extend_from_slice(self.try_to_vec().unwrap().as_ref());
        data
    }

    /// Parses account bytes, returning `None` when the discriminator does not
    /// match or the payload does not decode.
    fn from_account_data(data: &[u8]) -> Option<Self>
    where
        Self: Sized,
    {
        if data.len() < 8 || data[..8] != Self::discriminator() {
            return None;
        }
        Self::try_from_slice(&data[8..]).ok()
    }
}
