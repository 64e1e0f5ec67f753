/**
 * Card Bridge
 *
 * Off-chain core for a custodial virtual-card product backed by on-chain
 * escrow. Two independent sources of truth exist, the escrow state on the
 * ledger and the backend's card record, and this crate keeps them
 * consistent despite either side failing independently:
 *
 * - Deterministic address derivation for cards, escrows and the bridge state
 * - Card lifecycle orchestration: every operation is one ledger transaction
 *   followed, only on confirmed success, by one backend mutation, with a
 *   typed degraded-success outcome when the second phase fails
 * - A reconciliation monitor that ingests the program's log and
 *   account-change streams independently of the request path, deduplicates,
 *   classifies into domain events and fans out notifications with bounded
 *   retry
 *
 * The ledger is treated as an external service: submit a transaction, get a
 * deterministic success/failure plus a log stream. The on-chain program is
 * assumed to enforce the balance invariants atomically once a transaction
 * lands.
 */
pub mod addresses;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod events;
pub mod instruction;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod state;

pub use anchor_lang::{AnchorDeserialize, AnchorSerialize};

/// Program id of the card bridge deployment this crate defaults to.
pub use config::DEFAULT_PROGRAM_ID;
