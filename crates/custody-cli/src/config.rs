use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use custody_anchor::AnchorPolicy;
use custody_verify::VerificationOptions;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str = "custody.toml";

/// Contents of `custody.toml`. Every section and key is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    pub chain: ChainSection,
    pub signing: SigningSection,
    pub anchor: AnchorSection,
    pub verify: VerifySection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub log_path: PathBuf,
    pub anchor_log_path: PathBuf,
    /// fsync after every append
    pub sync_every_write: bool,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/links.jsonl"),
            anchor_log_path: PathBuf::from("data/anchors.jsonl"),
            sync_every_write: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSection {
    pub key_dir: PathBuf,
    pub signer_id: String,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("keys"),
            signer_id: "operator".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorSection {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// JSON export of ledger commitments used for offline checks.
    pub ledger_export: Option<PathBuf>,
}

impl Default for AnchorSection {
    fn default() -> Self {
        let policy = AnchorPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            attempt_timeout_ms: policy.attempt_timeout.as_millis() as u64,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            ledger_export: None,
        }
    }
}

impl AnchorSection {
    pub fn policy(&self) -> AnchorPolicy {
        AnchorPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    pub verify_anchors: bool,
    pub verify_signatures: bool,
    pub require_signatures: bool,
    pub max_anchor_checks: usize,
    pub deadline_secs: Option<u64>,
    pub trusted_keys: Vec<String>,
}

impl Default for VerifySection {
    fn default() -> Self {
        let options = VerificationOptions::default();
        Self {
            verify_anchors: options.verify_anchors,
            verify_signatures: options.verify_signatures,
            require_signatures: options.require_signatures,
            max_anchor_checks: options.max_anchor_checks,
            deadline_secs: None,
            trusted_keys: Vec::new(),
        }
    }
}

impl CustodyConfig {
    /// Load `path`, or `./custody.toml` if it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG).exists() => Self::from_file(Path::new(DEFAULT_CONFIG)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Verification options from the `[verify]` and `[anchor]` sections.
    pub fn verification_options(&self) -> VerificationOptions {
        VerificationOptions {
            verify_anchors: self.verify.verify_anchors,
            verify_signatures: self.verify.verify_signatures,
            require_signatures: self.verify.require_signatures,
            max_anchor_checks: self.verify.max_anchor_checks,
            anchor_policy: self.anchor.policy(),
            deadline: self.verify.deadline_secs.map(Duration::from_secs),
            trusted_keys: self.verify.trusted_keys.clone(),
        }
    }
}
