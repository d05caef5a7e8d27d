use std::io;
use std::path::PathBuf;

use custody_crypto::{CanonicalError, SigningError};

/// Errors produced by the link and anchor logs.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("canonical encoding failed: {0}")]
    Canonical(#[from] CanonicalError),

    /// The appended link does not continue the stored tail.
    #[error("link {found} does not extend the log: expected sequence {expected}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("link {sequence} does not point at the stored tail hash")]
    PreviousHashMismatch { sequence: u64 },

    /// A rewrite may only attach signatures, never change the chain.
    #[error("rewrite would alter link at position {position}")]
    ChainAltered { position: usize },

    #[error("log contains an undecodable record at line {position}")]
    MalformedRecord { position: usize },
}

/// Errors produced when loading or saving operator key files.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key file not found: {0}")]
    NotFound(PathBuf),

    #[error("key file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("key error: {0}")]
    Key(#[from] SigningError),
}

/// Convenience alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;
