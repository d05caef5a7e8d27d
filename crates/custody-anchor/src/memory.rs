use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use custody_types::LedgerCommitment;

use crate::error::{LedgerClientError, LedgerClientResult};
use crate::transport::AnchorLedgerClient;

/// Ledger client backed by a local map of commitments.
///
/// Used for offline audits against a downloaded ledger extract and in tests.
/// `fail_next` injects transport failures for a transaction.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
    calls: AtomicU32,
}

#[derive(Default)]
struct LedgerState {
    commitments: HashMap<String, LedgerCommitment>,
    pending_failures: HashMap<String, u32>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping transaction references to commitments.
    pub fn from_json_str(json: &str) -> LedgerClientResult<Self> {
        let commitments: HashMap<String, LedgerCommitment> =
            serde_json::from_str(json).map_err(|e| LedgerClientError::InvalidExport(e.to_string()))?;
        tracing::debug!(commitments = commitments.len(), "ledger export loaded");
        Ok(Self {
            inner: RwLock::new(LedgerState {
                commitments,
                pending_failures: HashMap::new(),
            }),
            calls: AtomicU32::new(0),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> LedgerClientResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn insert(&self, tx_reference: impl Into<String>, commitment: LedgerCommitment) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .commitments
            .insert(tx_reference.into(), commitment);
    }

    /// Make the next `count` lookups of `tx_reference` fail with a transport error.
    pub fn fail_next(&self, tx_reference: impl Into<String>, count: u32) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pending_failures
            .insert(tx_reference.into(), count);
    }

    /// Lookups served so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commitments
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnchorLedgerClient for InMemoryLedger {
    async fn fetch_commitment(
        &self,
        tx_reference: &str,
    ) -> LedgerClientResult<Option<LedgerCommitment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = state.pending_failures.get_mut(tx_reference) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerClientError::Transport(format!(
                    "injected failure for {tx_reference}"
                )));
            }
        }
        Ok(state.commitments.get(tx_reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const EXPORT: &str = r#"{
        "0xabc": {"root": "0x11", "block_height": 7, "success": true},
        "0xdef": {"root": "0x22", "success": false}
    }"#;

    #[tokio::test]
    async fn loads_export_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXPORT.as_bytes()).unwrap();

        let ledger = InMemoryLedger::from_json_file(file.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        let found = ledger.fetch_commitment("0xabc").await.unwrap().unwrap();
        assert_eq!(found.block_height, Some(7));
        assert!(ledger.fetch_commitment("0x000").await.unwrap().is_none());
    }

    #[test]
    fn malformed_export_is_rejected() {
        let err = InMemoryLedger::from_json_str("[1, 2]").err().unwrap();
        assert!(matches!(err, LedgerClientError::InvalidExport(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn injected_failures_drain() {
        let ledger = InMemoryLedger::from_json_str(EXPORT).unwrap();
        ledger.fail_next("0xabc", 1);
        let first = ledger.fetch_commitment("0xabc").await;
        assert!(matches!(first, Err(LedgerClientError::Transport(_))));
        assert!(ledger.fetch_commitment("0xabc").await.unwrap().is_some());
        assert_eq!(ledger.calls(), 2);
    }
}
