use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use custody_anchor::{AnchorLedgerClient, InMemoryLedger};
use custody_crypto::{sign_link, Batch};
use custody_store::{read_records_at, AnchorLog, KeyStore, LinkLog, SyncMode};
use custody_types::{AnchorRecord, Link, LinkContent, LinkRecord, OpaquePayload};
use custody_verify::{run_verification, RecordError, RecordSource, VerificationReport};

use crate::cli::*;
use crate::config::CustodyConfig;

/// File config with command-line overrides applied.
struct Session {
    config: CustodyConfig,
    format: OutputFormat,
    log_path: PathBuf,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CustodyConfig::load(cli.config.as_deref())?;
    let log_path = cli.log.clone().unwrap_or_else(|| config.chain.log_path.clone());
    let ctx = Session {
        config,
        format: cli.format,
        log_path,
    };

    match cli.command {
        Command::Keygen(args) => cmd_keygen(&ctx, args),
        Command::Append(args) => cmd_append(&ctx, args),
        Command::Sign(args) => cmd_sign(&ctx, args),
        Command::BatchRoot(args) => cmd_batch_root(&ctx, args),
        Command::Proof(args) => cmd_proof(&ctx, args),
        Command::Verify(args) => cmd_verify(&ctx, args),
    }
}

impl Session {
    fn open_log(&self) -> anyhow::Result<LinkLog> {
        let sync = if self.config.chain.sync_every_write {
            SyncMode::EveryWrite
        } else {
            SyncMode::OsDefault
        };
        LinkLog::open(&self.log_path, sync)
            .with_context(|| format!("opening link log {}", self.log_path.display()))
    }

    fn key_store(&self, key_dir: Option<PathBuf>) -> KeyStore {
        KeyStore::new(key_dir.unwrap_or_else(|| self.config.signing.key_dir.clone()))
    }

    fn signer_id(&self, signer_id: Option<String>) -> String {
        signer_id.unwrap_or_else(|| self.config.signing.signer_id.clone())
    }

    fn anchor_log(&self) -> AnchorLog {
        AnchorLog::new(self.config.chain.anchor_log_path.clone())
    }

    fn json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

fn cmd_keygen(ctx: &Session, args: KeygenArgs) -> anyhow::Result<()> {
    let store = ctx.key_store(args.key_dir);
    let keypair = store.generate(&ctx.signer_id(args.signer_id), args.force)?;
    if ctx.json() {
        println!(
            "{}",
            serde_json::json!({
                "signer_id": keypair.signer_id(),
                "public_key": keypair.public_key_hex(),
                "private_key_path": store.private_key_path(),
                "public_key_path": store.public_key_path(),
            })
        );
    } else {
        println!("{} Key pair generated for {}", "✓".green().bold(), keypair.signer_id().bold());
        println!("  Public key: {}", keypair.public_key_hex().cyan());
        println!("  Private key: {}", store.private_key_path().display());
    }
    Ok(())
}

fn cmd_append(ctx: &Session, args: AppendArgs) -> anyhow::Result<()> {
    let content = match (&args.content, &args.raw) {
        (Some(path), None) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<LinkContent>(&text)
                .with_context(|| format!("{} is not valid link content", path.display()))?
        }
        (None, Some(path)) => {
            let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let payload = OpaquePayload::new(data);
            LinkContent::Opaque(match args.media_type {
                Some(media_type) => payload.with_media_type(media_type),
                None => payload,
            })
        }
        _ => bail!("exactly one of --content or --raw is required"),
    };

    let log = ctx.open_log()?;
    let (link, _) = custody_crypto::append_link(&log.chain_state(), content)?;
    let link = if args.sign {
        let store = ctx.key_store(None);
        let keypair = store.load_keypair(&ctx.signer_id(None))?;
        sign_link(link, &keypair)?
    } else {
        link
    };
    log.append(&link)?;

    if ctx.json() {
        println!("{}", serde_json::to_string(&link)?);
    } else {
        let signed = if link.is_signed() { " (signed)" } else { "" };
        println!(
            "{} Appended link {} {}{}",
            "✓".green().bold(),
            link.sequence.to_string().bold(),
            link.hash.to_hex().yellow(),
            signed
        );
    }
    Ok(())
}

fn cmd_sign(ctx: &Session, args: SignArgs) -> anyhow::Result<()> {
    let keypair = ctx
        .key_store(args.key_dir)
        .load_keypair(&ctx.signer_id(args.signer_id))?;
    let log = ctx.open_log()?;

    let mut links = Vec::new();
    for record in log.read_records()? {
        match record {
            LinkRecord::Decoded(link) => links.push(link),
            LinkRecord::Malformed { position, error } => {
                bail!("cannot sign: line {position} of the link log is malformed ({error})")
            }
        }
    }

    let mut signed_count = 0usize;
    let signed = links
        .into_iter()
        .map(|link| {
            if link.is_signed() {
                Ok(link)
            } else {
                signed_count += 1;
                sign_link(link, &keypair)
            }
        })
        .collect::<Result<Vec<Link>, _>>()?;

    if signed_count > 0 {
        log.rewrite(&signed)?;
    }
    if ctx.json() {
        println!("{}", serde_json::json!({ "signed": signed_count, "total": signed.len() }));
    } else {
        println!("{} Signed {} of {} links", "✓".green().bold(), signed_count, signed.len());
    }
    Ok(())
}

/// Decoded links covering `range`, which must be contiguous.
fn batch_for(ctx: &Session, range: RangeArgs) -> anyhow::Result<Batch> {
    let log = ctx.open_log()?;
    let tail = log.chain_state().next_sequence;
    if tail == 0 {
        bail!("the link log is empty");
    }
    let first = range.from.unwrap_or(0);
    let last = range.to.unwrap_or(tail - 1);
    if first > last || last >= tail {
        bail!("range {first}..={last} is outside the chain (0..={})", tail - 1);
    }

    let links: Vec<Link> = log
        .read_records()?
        .into_iter()
        .filter_map(|record| match record {
            LinkRecord::Decoded(link) if (first..=last).contains(&link.sequence) => Some(link),
            _ => None,
        })
        .collect();
    Batch::from_links(&links).with_context(|| format!("building batch {first}..={last}"))
}

fn cmd_batch_root(ctx: &Session, args: BatchRootArgs) -> anyhow::Result<()> {
    let batch = batch_for(ctx, args.range)?;

    if let Some(tx) = args.anchor_tx {
        let record = AnchorRecord {
            batch_id: Some(uuid::Uuid::now_v7().to_string()),
            anchored_at: Some(chrono::Utc::now()),
            ..AnchorRecord::new(tx, batch.root.to_hex())
                .with_range(batch.first_sequence, batch.last_sequence)
        };
        ctx.anchor_log().append(&record)?;
        tracing::info!(tx = %record.tx_reference, root = %batch.root, "anchor recorded");
    }

    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    } else {
        println!(
            "Batch {}..={} ({} links)",
            batch.first_sequence,
            batch.last_sequence,
            batch.len()
        );
        println!("  Root: {}", batch.root.to_hex().yellow().bold());
    }
    Ok(())
}

fn cmd_proof(ctx: &Session, args: ProofArgs) -> anyhow::Result<()> {
    let batch = batch_for(ctx, args.range)?;
    let Some(proof) = batch.proof_for(args.sequence) else {
        bail!(
            "link {} is not in batch {}..={}",
            args.sequence,
            batch.first_sequence,
            batch.last_sequence
        );
    };

    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&proof)?);
    } else {
        println!("Link {} in batch {}..={}", args.sequence, batch.first_sequence, batch.last_sequence);
        println!("  Leaf: {}", proof.leaf.to_hex().yellow());
        for step in &proof.path {
            println!("  {:?}: {}", step.side, step.sibling.to_hex().dimmed());
        }
        println!("  Root: {}", proof.root.to_hex().yellow().bold());
        let status = if proof.verify() { "✓ verifies".green() } else { "✗ does not verify".red() };
        println!("  {status}");
    }
    Ok(())
}

fn cmd_verify(ctx: &Session, args: VerifyArgs) -> anyhow::Result<()> {
    let mut options = ctx.config.verification_options();
    options.verify_anchors |= args.anchors;
    options.require_signatures |= args.require_signatures;
    if args.skip_signatures {
        options.verify_signatures = false;
    }
    if let Some(max) = args.max_anchor_checks {
        options.max_anchor_checks = max;
    }
    if !args.trusted_keys.is_empty() {
        options.trusted_keys = args.trusted_keys;
    }
    if let Some(secs) = args.deadline_secs {
        options.deadline = Some(Duration::from_secs(secs));
    }

    let records = load_link_records(&ctx.log_path)?;
    let anchor_contents = if options.verify_anchors {
        ctx.anchor_log().read()?
    } else {
        Default::default()
    };

    let client = match args.ledger.or_else(|| ctx.config.anchor.ledger_export.clone()) {
        Some(path) => {
            let ledger = InMemoryLedger::from_json_file(&path)
                .with_context(|| format!("loading ledger export {}", path.display()))?;
            Some(Arc::new(ledger) as Arc<dyn AnchorLedgerClient>)
        }
        None => None,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let mut report = runtime.block_on(run_verification(
        &records,
        &anchor_contents.records,
        client,
        &options,
    ));
    report.push_record_errors(anchor_contents.malformed.into_iter().map(|line| RecordError {
        source: RecordSource::Anchors,
        position: line.position,
        error: line.error,
    }));

    if ctx.json() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    report.ensure_valid()?;
    Ok(())
}

/// Read the link log without creating or opening it for writing.
fn load_link_records(path: &Path) -> anyhow::Result<Vec<LinkRecord>> {
    if !path.is_file() {
        bail!("no link log at {}", path.display());
    }
    let records = read_records_at(path)
        .with_context(|| format!("reading link log {}", path.display()))?;
    if records.is_empty() {
        tracing::warn!(path = %path.display(), "link log holds no records");
    }
    Ok(records)
}

fn print_report(report: &VerificationReport) {
    let chain = &report.chain;
    if chain.total_links == 0 && report.record_errors.is_empty() {
        println!("{} Link log is empty: nothing was verified", "!".yellow().bold());
    }
    if chain.valid {
        println!(
            "{} Hash chain: {} links {}",
            "✓".green().bold(),
            chain.total_links,
            "valid".green()
        );
    } else {
        println!(
            "{} Hash chain: {} of {} links verified",
            "✗".red().bold(),
            chain.verified_links,
            chain.total_links
        );
        for fault in &chain.errors {
            println!("    {}", fault.to_string().red());
        }
    }

    for anchor in &report.anchors {
        if anchor.valid {
            let height = anchor.block_height.map_or_else(|| "?".to_string(), |h| h.to_string());
            println!("{} Anchor {} (block {})", "✓".green().bold(), anchor.tx_reference, height);
        } else {
            let code = anchor.error.map_or("unknown", |code| code.as_str());
            println!("{} Anchor {}: {}", "✗".red().bold(), anchor.tx_reference, code.red());
        }
    }

    if report.signature_failures.is_empty() {
        println!(
            "{} Signatures: {} unsigned link(s)",
            "✓".green().bold(),
            report.unsigned_links
        );
    } else {
        println!(
            "{} Signatures failed for links {:?}",
            "✗".red().bold(),
            report.signature_failures
        );
    }

    for err in &report.record_errors {
        println!("  {} {:?} line {}: {}", "!".yellow(), err.source, err.position, err.error);
    }

    let verdict = if report.overall_valid {
        "custody verified".green().bold()
    } else {
        "custody verification FAILED".red().bold()
    };
    println!("{verdict} ({:.3}s)", report.duration_seconds);
}
