use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::Utc;
use custody_anchor::{
    verify_anchor_until, AnchorErrorCode, AnchorLedgerClient, AnchorVerification,
};
use custody_crypto::{verify_link_signature, verify_records, Batch, ChainVerification};
use custody_types::{AnchorRecord, ChainState, Digest, Link, LinkRecord};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::options::VerificationOptions;
use crate::report::{RecordError, RecordSource, VerificationReport};

/// Run chain, anchor and signature checks over stored records.
///
/// Phases run in that order and each runs regardless of earlier failures.
/// Anchor lookups run concurrently; results keep the order in which the
/// records were selected (most recent first).
pub async fn run_verification(
    records: &[LinkRecord],
    anchor_records: &[AnchorRecord],
    client: Option<Arc<dyn AnchorLedgerClient>>,
    options: &VerificationOptions,
) -> VerificationReport {
    let started = StdInstant::now();
    let deadline = options.deadline.map(|budget| Instant::now() + budget);
    let links: Vec<&Link> = records.iter().filter_map(LinkRecord::link).collect();

    let record_errors: Vec<RecordError> = records
        .iter()
        .filter_map(|record| match record {
            LinkRecord::Malformed { position, error } => Some(RecordError {
                source: RecordSource::Links,
                position: *position,
                error: error.clone(),
            }),
            LinkRecord::Decoded(_) => None,
        })
        .collect();

    let chain = verify_records(ChainState::genesis(), records);
    debug!(
        total = chain.total_links,
        verified = chain.verified_links,
        "chain phase complete"
    );

    let anchors = if options.verify_anchors {
        verify_anchors(&links, anchor_records, client, options, deadline).await
    } else {
        Vec::new()
    };

    let (signature_failures, unsigned_links) = if options.verify_signatures {
        check_signatures(&links, options)
    } else {
        (Vec::new(), 0)
    };

    let mut report = VerificationReport {
        overall_valid: false,
        verified_at: Utc::now(),
        duration_seconds: started.elapsed().as_secs_f64(),
        chain,
        anchors,
        signature_failures,
        unsigned_links,
        record_errors,
    };
    report.settle();
    log_outcome(&report);
    report
}

/// Latest `max_anchor_checks` records, newest first.
fn select_anchors<'a>(anchor_records: &'a [AnchorRecord], max: usize) -> Vec<&'a AnchorRecord> {
    anchor_records.iter().rev().take(max).collect()
}

async fn verify_anchors(
    links: &[&Link],
    anchor_records: &[AnchorRecord],
    client: Option<Arc<dyn AnchorLedgerClient>>,
    options: &VerificationOptions,
    deadline: Option<Instant>,
) -> Vec<AnchorVerification> {
    let selected = select_anchors(anchor_records, options.max_anchor_checks);
    let mut slots: Vec<Option<AnchorVerification>> = vec![None; selected.len()];
    let mut tasks = JoinSet::new();

    for (slot, record) in selected.iter().enumerate() {
        if let Some(failure) = check_batch(links, record) {
            slots[slot] = Some(failure);
            continue;
        }
        let Some(client) = client.clone() else {
            slots[slot] = Some(AnchorVerification::failed(
                &record.tx_reference,
                Some(&record.claimed_root),
                AnchorErrorCode::RpcUnavailable,
                "no ledger client configured",
            ));
            continue;
        };

        let tx_reference = record.tx_reference.clone();
        let claimed_root = record.claimed_root.clone();
        let policy = options.anchor_policy.clone();
        tasks.spawn(async move {
            let result = verify_anchor_until(
                &tx_reference,
                Some(&claimed_root),
                client.as_ref(),
                &policy,
                deadline,
            )
            .await;
            (slot, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, result)) => slots[slot] = Some(result),
            Err(e) => warn!(error = %e, "anchor task did not complete"),
        }
    }

    selected
        .iter()
        .zip(slots)
        .map(|(record, slot)| {
            slot.unwrap_or_else(|| {
                AnchorVerification::failed(
                    &record.tx_reference,
                    Some(&record.claimed_root),
                    AnchorErrorCode::RpcUnavailable,
                    "anchor task aborted",
                )
            })
        })
        .collect()
}

/// Rebuild a ranged batch from local links and compare it with the claimed root.
///
/// Returns a failure when the local chain already disproves the record, so
/// no ledger call is made for it.
fn check_batch(links: &[&Link], record: &AnchorRecord) -> Option<AnchorVerification> {
    let (first, last) = record.range()?;
    let fail = |code, detail: String| {
        Some(AnchorVerification::failed(
            &record.tx_reference,
            Some(&record.claimed_root),
            code,
            detail,
        ))
    };

    if last < first {
        return fail(
            AnchorErrorCode::BatchIncomplete,
            format!("empty batch range {first}..={last}"),
        );
    }
    let batch_links: Vec<Link> = links
        .iter()
        .filter(|link| (first..=last).contains(&link.sequence))
        .map(|link| (*link).clone())
        .collect();
    let Some(expected_len) = last.checked_sub(first).and_then(|span| span.checked_add(1)) else {
        return fail(
            AnchorErrorCode::BatchIncomplete,
            format!("batch range {first}..={last} is not addressable"),
        );
    };
    if batch_links.len() as u64 != expected_len {
        return fail(
            AnchorErrorCode::BatchIncomplete,
            format!(
                "batch {first}..={last} needs {expected_len} links, found {}",
                batch_links.len()
            ),
        );
    }

    let batch = match Batch::from_links(&batch_links) {
        Ok(batch) => batch,
        Err(e) => return fail(AnchorErrorCode::BatchIncomplete, e.to_string()),
    };
    match Digest::from_hex(&record.claimed_root) {
        Ok(claimed) if claimed == batch.root => None,
        Ok(_) => fail(
            AnchorErrorCode::BatchRootMismatch,
            format!("local batch root is {}", batch.root),
        ),
        Err(e) => fail(
            AnchorErrorCode::InvalidRoot,
            format!("claimed root is malformed: {e}"),
        ),
    }
}

/// Returns the failing sequences and the count of unsigned links.
fn check_signatures(links: &[&Link], options: &VerificationOptions) -> (Vec<u64>, usize) {
    let mut failures = Vec::new();
    let mut unsigned = 0usize;

    for link in links {
        match &link.signature {
            None => {
                unsigned += 1;
                if options.require_signatures {
                    failures.push(link.sequence);
                }
            }
            Some(block) => {
                if !options.is_trusted(&block.public_key) {
                    warn!(sequence = link.sequence, signer = %block.signer_id, "signer is not trusted");
                    failures.push(link.sequence);
                } else if !verify_link_signature(link) {
                    warn!(sequence = link.sequence, "signature does not verify");
                    failures.push(link.sequence);
                }
            }
        }
    }
    (failures, unsigned)
}

fn log_outcome(report: &VerificationReport) {
    if report.overall_valid {
        info!(
            links = report.chain.total_links,
            anchors = report.anchors.len(),
            unsigned = report.unsigned_links,
            duration_seconds = report.duration_seconds,
            "custody verification passed"
        );
        return;
    }

    let ChainVerification {
        valid, broken_at, ..
    } = &report.chain;
    let failed_anchors: Vec<String> = report
        .failed_anchors()
        .map(|anchor| {
            let code = anchor.error.map_or("unknown", |code| code.as_str());
            format!("{}:{code}", anchor.tx_reference)
        })
        .collect();
    error!(
        chain_valid = valid,
        broken_at = ?broken_at,
        chain_error = ?report.chain.fault().map(ToString::to_string),
        failed_anchors = ?failed_anchors,
        signature_failures = ?report.signature_failures,
        record_errors = report.record_errors.len(),
        "custody verification failed"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use custody_anchor::{AnchorPolicy, InMemoryLedger};
    use custody_crypto::{append_link, build_batch_root, generate_keypair, sign_link};
    use custody_types::{LedgerCommitment, LinkContent, OpaquePayload};

    use super::*;

    fn build_chain(n: usize) -> Vec<Link> {
        let mut state = ChainState::genesis();
        (0..n)
            .map(|i| {
                let content = LinkContent::Opaque(OpaquePayload::new(vec![i as u8; 2]));
                let (link, next) = append_link(&state, content).unwrap();
                state = next;
                link
            })
            .collect()
    }

    fn records(links: &[Link]) -> Vec<LinkRecord> {
        links.iter().cloned().map(LinkRecord::from).collect()
    }

    fn ledger_for(entries: &[(&str, String)]) -> Arc<InMemoryLedger> {
        let ledger = InMemoryLedger::new();
        for (tx, root) in entries {
            ledger.insert(
                *tx,
                LedgerCommitment {
                    root: root.clone(),
                    block_height: Some(10),
                    block_time: None,
                    success: true,
                },
            );
        }
        Arc::new(ledger)
    }

    fn anchor_options() -> VerificationOptions {
        VerificationOptions {
            verify_anchors: true,
            anchor_policy: AnchorPolicy {
                max_attempts: 2,
                attempt_timeout: Duration::from_millis(200),
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn clean_chain_with_anchor_passes() {
        let links = build_chain(4);
        let root = build_batch_root(&links);
        let anchors = vec![AnchorRecord::new("0xa", root.to_hex()).with_range(0, 3)];
        let ledger = ledger_for(&[("0xa", format!("0x{root}"))]);

        let report = run_verification(&records(&links), &anchors, Some(ledger), &anchor_options()).await;
        assert!(report.overall_valid, "{report:?}");
        assert_eq!(report.anchors.len(), 1);
        assert_eq!(report.unsigned_links, 4);
        assert!(report.ensure_valid().is_ok());
    }

    #[tokio::test]
    async fn empty_input_is_valid() {
        let report = run_verification(&[], &[], None, &VerificationOptions::default()).await;
        assert!(report.overall_valid);
        assert_eq!(report.chain.total_links, 0);
    }

    #[tokio::test]
    async fn batch_mismatch_fails_without_ledger_call() {
        let links = build_chain(4);
        let wrong = build_batch_root(&links[..3]);
        let anchors = vec![AnchorRecord::new("0xa", wrong.to_hex()).with_range(0, 3)];
        let ledger = ledger_for(&[("0xa", wrong.to_hex())]);

        let report =
            run_verification(&records(&links), &anchors, Some(ledger.clone()), &anchor_options()).await;
        assert!(!report.overall_valid);
        assert_eq!(report.anchors[0].error, Some(AnchorErrorCode::BatchRootMismatch));
        assert_eq!(ledger.calls(), 0);
    }

    #[tokio::test]
    async fn batch_beyond_chain_is_incomplete() {
        let links = build_chain(2);
        let anchors = vec![AnchorRecord::new("0xa", build_batch_root(&links).to_hex()).with_range(0, 5)];
        let report = run_verification(&records(&links), &anchors, None, &anchor_options()).await;
        assert_eq!(report.anchors[0].error, Some(AnchorErrorCode::BatchIncomplete));
    }

    #[tokio::test]
    async fn extreme_batch_ranges_are_reported_per_anchor() {
        let mut links = build_chain(1);
        let root = build_batch_root(&links).to_hex();
        let anchors = vec![AnchorRecord::new("0xa", root.clone()).with_range(0, u64::MAX)];
        let report = run_verification(&records(&links), &anchors, None, &anchor_options()).await;
        assert_eq!(report.anchors[0].error, Some(AnchorErrorCode::BatchIncomplete));
        assert!(report.chain.valid);

        links[0].sequence = u64::MAX;
        let anchors = vec![
            AnchorRecord::new("0xb", Digest::of(b"other").to_hex()).with_range(u64::MAX, u64::MAX),
            AnchorRecord::new("0xc", root).with_range(u64::MAX, u64::MAX),
        ];
        let report = run_verification(&records(&links), &anchors, None, &anchor_options()).await;
        assert_eq!(report.anchors[0].tx_reference, "0xc");
        assert_eq!(report.anchors[0].error, Some(AnchorErrorCode::RpcUnavailable));
        assert_eq!(report.anchors[1].error, Some(AnchorErrorCode::BatchRootMismatch));
    }

    #[tokio::test]
    async fn missing_client_marks_anchor_unavailable() {
        let links = build_chain(1);
        let anchors = vec![AnchorRecord::new("0xa", links[0].hash.to_hex())];
        let report = run_verification(&records(&links), &anchors, None, &anchor_options()).await;
        assert!(report.chain.valid);
        assert_eq!(report.anchors[0].error, Some(AnchorErrorCode::RpcUnavailable));
        assert!(!report.overall_valid);
    }

    #[tokio::test]
    async fn anchors_checked_newest_first_up_to_limit() {
        let links = build_chain(1);
        let root = links[0].hash.to_hex();
        let anchors: Vec<AnchorRecord> = (0..4)
            .map(|i| AnchorRecord::new(format!("0x{i}"), root.clone()))
            .collect();
        let ledger = ledger_for(&[("0x2", root.clone()), ("0x3", root.clone())]);
        let options = VerificationOptions {
            max_anchor_checks: 2,
            ..anchor_options()
        };

        let report = run_verification(&records(&links), &anchors, Some(ledger), &options).await;
        let order: Vec<&str> = report.anchors.iter().map(|a| a.tx_reference.as_str()).collect();
        assert_eq!(order, ["0x3", "0x2"]);
        assert!(report.overall_valid);
    }

    #[tokio::test]
    async fn anchors_skipped_when_disabled() {
        let links = build_chain(2);
        let anchors = vec![AnchorRecord::new("", "")];
        let report =
            run_verification(&records(&links), &anchors, None, &VerificationOptions::default()).await;
        assert!(report.anchors.is_empty());
        assert!(report.overall_valid);
    }

    #[tokio::test]
    async fn signature_phase_reports_bad_and_unsigned_links() {
        let keypair = generate_keypair("operator-1");
        let mut links = build_chain(3);
        links[0] = sign_link(links[0].clone(), &keypair).unwrap();
        links[1] = sign_link(links[1].clone(), &keypair).unwrap();
        if let Some(block) = links[1].signature.as_mut() {
            block.signature = "00".repeat(64);
        }

        let lenient = run_verification(&records(&links), &[], None, &VerificationOptions::default()).await;
        assert_eq!(lenient.signature_failures, vec![1]);
        assert_eq!(lenient.unsigned_links, 1);
        assert!(lenient.chain.valid);

        let strict = VerificationOptions {
            require_signatures: true,
            ..Default::default()
        };
        let report = run_verification(&records(&links), &[], None, &strict).await;
        assert_eq!(report.signature_failures, vec![1, 2]);
    }

    #[tokio::test]
    async fn untrusted_signer_fails() {
        let trusted = generate_keypair("operator-1");
        let rogue = generate_keypair("rogue");
        let links: Vec<Link> = build_chain(2)
            .into_iter()
            .enumerate()
            .map(|(i, link)| {
                let key = if i == 0 { &trusted } else { &rogue };
                sign_link(link, key).unwrap()
            })
            .collect();
        let options = VerificationOptions {
            trusted_keys: vec![trusted.public_key_hex()],
            ..Default::default()
        };

        let report = run_verification(&records(&links), &[], None, &options).await;
        assert_eq!(report.signature_failures, vec![1]);
    }

    #[tokio::test]
    async fn malformed_record_reported_and_skipped() {
        let links = build_chain(2);
        let mut stored = records(&links);
        stored.insert(
            1,
            LinkRecord::Malformed {
                position: 2,
                error: "EOF while parsing".into(),
            },
        );

        let report = run_verification(&stored, &[], None, &VerificationOptions::default()).await;
        assert_eq!(report.chain.broken_at, Some(1));
        assert_eq!(report.record_errors.len(), 1);
        assert_eq!(report.record_errors[0].source, RecordSource::Links);
        assert_eq!(report.unsigned_links, 2);
    }
}
