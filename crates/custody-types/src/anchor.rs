use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Producer-side evidence that a batch root was committed to an external ledger.
///
/// `claimed_root` stays a string: anchor logs are untrusted input and a
/// malformed root is reported by the verifier rather than rejected on load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub tx_reference: String,
    pub claimed_root: String,
    /// First link sequence folded into the batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_sequence: Option<u64>,
    /// Last link sequence folded into the batch (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored_at: Option<DateTime<Utc>>,
}

impl AnchorRecord {
    pub fn new(tx_reference: impl Into<String>, claimed_root: impl Into<String>) -> Self {
        Self {
            tx_reference: tx_reference.into(),
            claimed_root: claimed_root.into(),
            first_sequence: None,
            last_sequence: None,
            batch_id: None,
            anchored_at: None,
        }
    }

    /// Record the inclusive sequence range covered by the batch.
    pub fn with_range(mut self, first: u64, last: u64) -> Self {
        self.first_sequence = Some(first);
        self.last_sequence = Some(last);
        self
    }

    /// The batch range, when both ends are known.
    pub fn range(&self) -> Option<(u64, u64)> {
        match (self.first_sequence, self.last_sequence) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        }
    }
}

/// A commitment as read back from the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCommitment {
    /// Committed root as reported by the ledger (may carry a `0x` prefix).
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    /// Block time in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    /// Whether the transaction executed successfully.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_requires_both_ends() {
        let record = AnchorRecord::new("0xabc", "00");
        assert_eq!(record.range(), None);
        assert_eq!(record.with_range(3, 7).range(), Some((3, 7)));
    }

    #[test]
    fn anchor_record_parses_minimal_log_line() {
        let record: AnchorRecord =
            serde_json::from_str(r#"{"tx_reference":"0x01","claimed_root":"0xff"}"#).unwrap();
        assert_eq!(record.tx_reference, "0x01");
        assert!(record.anchored_at.is_none());
    }
}
