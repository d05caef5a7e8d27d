use std::time::Duration;

use custody_anchor::AnchorPolicy;
use serde::{Deserialize, Serialize};

/// Which checks [`run_verification`](crate::run_verification) performs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationOptions {
    /// Check anchor records against the ledger.
    pub verify_anchors: bool,
    /// Check operator signatures on signed links.
    pub verify_signatures: bool,
    /// Count unsigned links as signature failures.
    pub require_signatures: bool,
    /// Most recent anchor records to check.
    pub max_anchor_checks: usize,
    pub anchor_policy: AnchorPolicy,
    /// Wall-clock budget for the anchor phase as a whole.
    pub deadline: Option<Duration>,
    /// Hex public keys accepted as signers. Empty accepts any embedded key.
    pub trusted_keys: Vec<String>,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            verify_anchors: false,
            verify_signatures: true,
            require_signatures: false,
            max_anchor_checks: 5,
            anchor_policy: AnchorPolicy::default(),
            deadline: None,
            trusted_keys: Vec::new(),
        }
    }
}

impl VerificationOptions {
    /// Every check on, signatures mandatory.
    pub fn strict() -> Self {
        Self {
            verify_anchors: true,
            require_signatures: true,
            ..Default::default()
        }
    }

    pub(crate) fn is_trusted(&self, public_key_hex: &str) -> bool {
        self.trusted_keys.is_empty()
            || self
                .trusted_keys
                .iter()
                .any(|key| key.trim().eq_ignore_ascii_case(public_key_hex.trim()))
    }
}
