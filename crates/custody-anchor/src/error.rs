use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid ledger export: {0}")]
    InvalidExport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerClientError {
    /// Transport-level failures are worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

pub type LedgerClientResult<T> = Result<T, LedgerClientError>;
