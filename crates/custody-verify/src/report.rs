use chrono::{DateTime, Utc};
use custody_anchor::AnchorVerification;
use custody_crypto::ChainVerification;
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Which log an undecodable record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Links,
    Anchors,
}

/// A stored record that could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub source: RecordSource,
    /// 1-based line number.
    pub position: usize,
    pub error: String,
}

/// Aggregate outcome of chain, anchor and signature checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub overall_valid: bool,
    pub verified_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub chain: ChainVerification,
    pub anchors: Vec<AnchorVerification>,
    /// Sequences of links whose signature failed.
    pub signature_failures: Vec<u64>,
    pub unsigned_links: usize,
    pub record_errors: Vec<RecordError>,
}

impl VerificationReport {
    pub fn failed_anchors(&self) -> impl Iterator<Item = &AnchorVerification> {
        self.anchors.iter().filter(|anchor| !anchor.valid)
    }

    /// Recompute `overall_valid` from the sub-results.
    pub(crate) fn settle(&mut self) {
        self.overall_valid = self.chain.valid
            && self.anchors.iter().all(|anchor| anchor.valid)
            && self.signature_failures.is_empty();
    }

    /// Gate decision: `Err` when anything failed.
    pub fn ensure_valid(&self) -> Result<(), VerifyError> {
        if self.overall_valid {
            return Ok(());
        }
        Err(VerifyError::Invalid {
            chain_valid: self.chain.valid,
            broken_at: self.chain.broken_at,
            failed_anchors: self.failed_anchors().count(),
            signature_failures: self.signature_failures.len(),
        })
    }

    /// Add decode failures found outside the link log (e.g. the anchor log).
    pub fn push_record_errors(&mut self, errors: impl IntoIterator<Item = RecordError>) {
        self.record_errors.extend(errors);
    }
}

#[cfg(test)]
mod tests {
    use custody_crypto::verify_chain;

    use super::*;

    fn report(chain_valid: bool, anchor_valid: bool, signature_failures: Vec<u64>) -> VerificationReport {
        let mut chain = verify_chain(&[]);
        chain.valid = chain_valid;
        let mut report = VerificationReport {
            overall_valid: false,
            verified_at: Utc::now(),
            duration_seconds: 0.0,
            chain,
            anchors: vec![AnchorVerification {
                valid: anchor_valid,
                tx_reference: "0x01".into(),
                expected_root: None,
                onchain_root: None,
                block_height: None,
                block_time: None,
                attempts: 1,
                error: None,
                detail: None,
            }],
            signature_failures,
            unsigned_links: 0,
            record_errors: Vec::new(),
        };
        report.settle();
        report
    }

    #[test]
    fn overall_requires_every_phase() {
        assert!(report(true, true, vec![]).overall_valid);
        assert!(!report(false, true, vec![]).overall_valid);
        assert!(!report(true, false, vec![]).overall_valid);
        assert!(!report(true, true, vec![2]).overall_valid);
    }

    #[test]
    fn ensure_valid_summarizes_failures() {
        assert!(report(true, true, vec![]).ensure_valid().is_ok());
        let err = report(true, false, vec![1, 4]).ensure_valid().unwrap_err();
        assert_eq!(
            err,
            VerifyError::Invalid {
                chain_valid: true,
                broken_at: None,
                failed_anchors: 1,
                signature_failures: 2,
            }
        );
    }

    #[test]
    fn report_serializes_expected_keys() {
        let value = serde_json::to_value(report(true, true, vec![])).unwrap();
        for key in [
            "overall_valid",
            "verified_at",
            "duration_seconds",
            "chain",
            "anchors",
            "signature_failures",
            "unsigned_links",
            "record_errors",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["chain"]["broken_at"].is_null());
    }
}
