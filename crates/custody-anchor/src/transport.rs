use async_trait::async_trait;
use custody_types::LedgerCommitment;

use crate::error::LedgerClientResult;

/// Read access to the ledger that holds batch-root commitments.
///
/// `Ok(None)` means the ledger answered and has no such transaction. Errors
/// are reserved for failing to get an answer at all.
#[async_trait]
pub trait AnchorLedgerClient: Send + Sync {
    async fn fetch_commitment(&self, tx_reference: &str)
        -> LedgerClientResult<Option<LedgerCommitment>>;
}
