use std::fmt;

use custody_types::{Digest, LedgerCommitment};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, timeout_at, Instant};

use crate::error::{LedgerClientError, LedgerClientResult};
use crate::policy::AnchorPolicy;
use crate::transport::AnchorLedgerClient;

/// Why an anchor failed to verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorErrorCode {
    MissingRpcTarget,
    InvalidRoot,
    RpcUnavailable,
    RpcTimeout,
    TxFailedOrNotFound,
    RootMismatch,
    BatchRootMismatch,
    BatchIncomplete,
}

impl AnchorErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRpcTarget => "missing_rpc_target",
            Self::InvalidRoot => "invalid_root",
            Self::RpcUnavailable => "rpc_unavailable",
            Self::RpcTimeout => "rpc_timeout",
            Self::TxFailedOrNotFound => "tx_failed_or_not_found",
            Self::RootMismatch => "root_mismatch",
            Self::BatchRootMismatch => "batch_root_mismatch",
            Self::BatchIncomplete => "batch_incomplete",
        }
    }
}

impl fmt::Display for AnchorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one anchor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorVerification {
    pub valid: bool,
    pub tx_reference: String,
    pub expected_root: Option<String>,
    pub onchain_root: Option<String>,
    pub block_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    /// Ledger calls made, including retries.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AnchorErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AnchorVerification {
    /// A failed check that never reached the ledger, or gave up on it.
    pub fn failed(
        tx_reference: &str,
        expected_root: Option<&str>,
        code: AnchorErrorCode,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            tx_reference: tx_reference.to_string(),
            expected_root: expected_root.map(str::to_string),
            onchain_root: None,
            block_height: None,
            block_time: None,
            attempts: 0,
            error: Some(code),
            detail: Some(detail.into()),
        }
    }

    fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Compare two roots ignoring case and an optional `0x` prefix.
///
/// A root that is not 32 bytes of hex never matches.
pub fn roots_match(expected: &str, onchain: &str) -> bool {
    match (Digest::from_hex(expected), Digest::from_hex(onchain)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Check that `tx_reference` commits to `expected_root`.
pub async fn verify_anchor(
    tx_reference: &str,
    expected_root: Option<&str>,
    client: &dyn AnchorLedgerClient,
    policy: &AnchorPolicy,
) -> AnchorVerification {
    verify_anchor_until(tx_reference, expected_root, client, policy, None).await
}

/// [`verify_anchor`] bounded by an absolute deadline covering all attempts.
pub async fn verify_anchor_until(
    tx_reference: &str,
    expected_root: Option<&str>,
    client: &dyn AnchorLedgerClient,
    policy: &AnchorPolicy,
    deadline: Option<Instant>,
) -> AnchorVerification {
    if tx_reference.trim().is_empty() {
        return AnchorVerification::failed(
            tx_reference,
            expected_root,
            AnchorErrorCode::MissingRpcTarget,
            "anchor record has no transaction reference",
        );
    }
    let expected = match expected_root.map(Digest::from_hex) {
        Some(Ok(digest)) => digest,
        Some(Err(e)) => {
            return AnchorVerification::failed(
                tx_reference,
                expected_root,
                AnchorErrorCode::InvalidRoot,
                format!("expected root is malformed: {e}"),
            )
        }
        None => {
            return AnchorVerification::failed(
                tx_reference,
                expected_root,
                AnchorErrorCode::InvalidRoot,
                "no expected root",
            )
        }
    };

    let mut attempts = 0u32;
    let fetched = match deadline {
        Some(deadline) => {
            let bounded =
                timeout_at(deadline, fetch_with_retry(client, tx_reference, policy, &mut attempts)).await;
            match bounded {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(tx = tx_reference, attempts, "anchor check hit deadline");
                    return AnchorVerification::failed(
                        tx_reference,
                        expected_root,
                        AnchorErrorCode::RpcTimeout,
                        "verification deadline elapsed",
                    )
                    .with_attempts(attempts);
                }
            }
        }
        None => fetch_with_retry(client, tx_reference, policy, &mut attempts).await,
    };

    let commitment = match fetched {
        Ok(Some(commitment)) if commitment.success => commitment,
        Ok(Some(_)) => {
            return AnchorVerification::failed(
                tx_reference,
                expected_root,
                AnchorErrorCode::TxFailedOrNotFound,
                "transaction did not execute successfully",
            )
            .with_attempts(attempts)
        }
        Ok(None) => {
            return AnchorVerification::failed(
                tx_reference,
                expected_root,
                AnchorErrorCode::TxFailedOrNotFound,
                "transaction not found",
            )
            .with_attempts(attempts)
        }
        Err(e) => {
            return AnchorVerification::failed(
                tx_reference,
                expected_root,
                AnchorErrorCode::RpcUnavailable,
                e.to_string(),
            )
            .with_attempts(attempts)
        }
    };

    compare(tx_reference, expected_root, &expected, commitment, attempts)
}

fn compare(
    tx_reference: &str,
    expected_root: Option<&str>,
    expected: &Digest,
    commitment: LedgerCommitment,
    attempts: u32,
) -> AnchorVerification {
    let matches = Digest::from_hex(&commitment.root).is_ok_and(|onchain| onchain == *expected);
    if !matches {
        tracing::warn!(
            tx = tx_reference,
            expected = %expected,
            onchain = %commitment.root,
            "anchored root does not match"
        );
    }
    AnchorVerification {
        valid: matches,
        tx_reference: tx_reference.to_string(),
        expected_root: expected_root.map(str::to_string),
        onchain_root: Some(commitment.root),
        block_height: commitment.block_height,
        block_time: commitment.block_time,
        attempts,
        error: (!matches).then_some(AnchorErrorCode::RootMismatch),
        detail: None,
    }
}

/// Call the ledger until it answers, retrying transport failures only.
async fn fetch_with_retry(
    client: &dyn AnchorLedgerClient,
    tx_reference: &str,
    policy: &AnchorPolicy,
    attempts: &mut u32,
) -> LedgerClientResult<Option<LedgerCommitment>> {
    let max = policy.attempts();
    loop {
        *attempts += 1;
        let result = match timeout(policy.attempt_timeout, client.fetch_commitment(tx_reference)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerClientError::Timeout(policy.attempt_timeout)),
        };

        match result {
            Err(e) if e.is_retryable() && *attempts < max => {
                let delay = policy.backoff_after(*attempts);
                tracing::warn!(
                    tx = tx_reference,
                    attempt = *attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "ledger call failed, retrying"
                );
                sleep(delay).await;
            }
            other => return other,
        }
    }
}
