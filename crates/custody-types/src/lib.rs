//! Foundation types for the election-result custody chain.
//!
//! Every other custody crate depends on `custody-types`. The types here carry
//! no cryptographic behaviour beyond digest parsing; hashing, signing and
//! verification live in `custody-crypto`.
//!
//! # Key Types
//!
//! - [`Digest`]: SHA-256 value, persisted as 64 lowercase hex characters
//! - [`Link`]: one hash-chained custody entry
//! - [`LinkContent`]: tagged union over the producer payload shapes
//! - [`ChainState`]: explicit chain position threaded through appends
//! - [`AnchorRecord`] / [`LedgerCommitment`]: external ledger evidence

pub mod anchor;
pub mod content;
pub mod digest;
pub mod error;
pub mod link;

pub use anchor::{AnchorRecord, LedgerCommitment};
pub use content::{CandidateTally, LinkContent, OpaquePayload, ResultsSummary, SnapshotMetadata};
pub use digest::Digest;
pub use error::TypeError;
pub use link::{ChainState, Link, LinkRecord, LinkSignature, SignableLink, SIGNATURE_ALGORITHM};
