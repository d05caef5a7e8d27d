//! Cryptographic core of the election-result custody chain.
//!
//! Provides RFC 8785 canonical encoding, the framed SHA-256 hash chain,
//! order-preserving Merkle batch roots with inclusion proofs, and Ed25519
//! operator signatures over link digests.
//!
//! Every function here is pure and synchronous. Verification entry points
//! return values, never errors, for untrusted input.

pub mod canonical;
pub mod chain;
pub mod hasher;
pub mod merkle;
pub mod signer;

pub use canonical::{canonicalize, canonicalize_fields, CanonicalError};
pub use chain::{
    append_link, verify_chain, verify_chain_from, verify_records, ChainErrorCode, ChainFault,
    ChainVerification,
};
pub use hasher::{compute_link_hash, content_bytes, link_hash, CHAIN_DOMAIN};
pub use merkle::{
    build_batch_root, build_root, Batch, BatchError, MerkleProof, MerkleTree, ProofStep, Side,
};
pub use signer::{
    generate_keypair, sign_link, verify, verify_link_signature, OperatorKeypair,
    OperatorPublicKey, Signature, SigningError,
};
