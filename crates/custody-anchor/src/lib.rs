//! Ledger anchor verification.
//!
//! A batch root is "anchored" when a transaction on an external ledger
//! commits to it. This crate reads the commitment back through an
//! [`AnchorLedgerClient`] and compares it with the expected root, retrying
//! transport failures under an [`AnchorPolicy`].

pub mod error;
pub mod memory;
pub mod policy;
pub mod transport;
pub mod verifier;

pub use error::{LedgerClientError, LedgerClientResult};
pub use memory::InMemoryLedger;
pub use policy::AnchorPolicy;
pub use transport::AnchorLedgerClient;
pub use verifier::{
    roots_match, verify_anchor, verify_anchor_until, AnchorErrorCode, AnchorVerification,
};
