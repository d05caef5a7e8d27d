use std::fmt;

use custody_types::{ChainState, Digest, Link, LinkContent, LinkRecord};
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalError;
use crate::hasher::{compute_link_hash, content_bytes};

/// Append a new link after `state`.
///
/// Returns the link and the state to pass to the next append. The caller owns
/// chain position; nothing here is global.
pub fn append_link(
    state: &ChainState,
    content: LinkContent,
) -> Result<(Link, ChainState), CanonicalError> {
    let hash = compute_link_hash(&state.last_hash, &content_bytes(&content)?);
    let link = Link {
        sequence: state.next_sequence,
        content,
        previous_hash: state.last_hash,
        hash,
        signature: None,
    };
    let next = ChainState::after(&link);
    Ok((link, next))
}

/// Error code attached to a chain break.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainErrorCode {
    HashMismatch,
    MissingLink,
    DecodeError,
}

impl ChainErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::MissingLink => "missing_link",
            Self::DecodeError => "decode_error",
        }
    }
}

impl fmt::Display for ChainErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The break that stopped a chain walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFault {
    pub code: ChainErrorCode,
    /// Position in the walked sequence (0-based).
    pub index: usize,
    pub detail: String,
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} index={} {}", self.code, self.index, self.detail)
    }
}

/// Outcome of a chain walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_links: usize,
    /// Links verified before the break (all of them when valid).
    pub verified_links: usize,
    pub broken_at: Option<usize>,
    pub errors: Vec<ChainFault>,
    pub first_hash: Option<Digest>,
    /// Hash of the last verified link.
    pub last_hash: Option<Digest>,
}

impl ChainVerification {
    /// The fault that broke the chain, if any.
    pub fn fault(&self) -> Option<&ChainFault> {
        self.errors.first()
    }
}

/// Verify a full chain starting from genesis.
pub fn verify_chain(links: &[Link]) -> ChainVerification {
    verify_chain_from(ChainState::genesis(), links)
}

/// Verify links that continue a chain already known to end at `anchor`.
pub fn verify_chain_from(anchor: ChainState, links: &[Link]) -> ChainVerification {
    walk(anchor, links.iter().map(Ok))
}

/// Verify persisted records, treating an undecodable record as a break.
pub fn verify_records(anchor: ChainState, records: &[LinkRecord]) -> ChainVerification {
    walk(
        anchor,
        records.iter().map(|record| match record {
            LinkRecord::Decoded(link) => Ok(link),
            LinkRecord::Malformed { position, error } => Err((*position, error.as_str())),
        }),
    )
}

/// Walk links in the given order and stop at the first failure.
///
/// Each link must carry the next expected sequence, point at the predecessor's
/// stored hash and hash to its stored value. After a break every later
/// `previous_hash` is unverifiable relative to the anchor, so the walk ends.
fn walk<'a, I>(anchor: ChainState, items: I) -> ChainVerification
where
    I: ExactSizeIterator<Item = Result<&'a Link, (usize, &'a str)>>,
{
    let total_links = items.len();
    let mut expected_sequence = anchor.next_sequence;
    let mut expected_prev = anchor.last_hash;
    let mut first_hash = None;
    let mut last_hash = None;
    let mut verified = 0usize;

    for (index, item) in items.enumerate() {
        let outcome = match item {
            Err((position, error)) => Err(ChainFault {
                code: ChainErrorCode::DecodeError,
                index,
                detail: format!("record {position} could not be decoded: {error}"),
            }),
            Ok(link) => {
                if index == 0 {
                    first_hash = Some(link.hash);
                }
                check_link(link, index, expected_sequence, &expected_prev).map(|()| link)
            }
        };

        match outcome {
            Ok(link) => {
                verified += 1;
                expected_sequence = link.sequence + 1;
                expected_prev = link.hash;
                last_hash = Some(link.hash);
            }
            Err(fault) => {
                tracing::debug!(index, code = %fault.code, "chain walk stopped");
                return ChainVerification {
                    valid: false,
                    total_links,
                    verified_links: verified,
                    broken_at: Some(index),
                    errors: vec![fault],
                    first_hash,
                    last_hash,
                };
            }
        }
    }

    ChainVerification {
        valid: true,
        total_links,
        verified_links: verified,
        broken_at: None,
        errors: Vec::new(),
        first_hash,
        last_hash,
    }
}

fn check_link(
    link: &Link,
    index: usize,
    expected_sequence: u64,
    expected_prev: &Digest,
) -> Result<(), ChainFault> {
    if link.sequence != expected_sequence {
        return Err(ChainFault {
            code: ChainErrorCode::MissingLink,
            index,
            detail: format!("expected sequence {expected_sequence}, found {}", link.sequence),
        });
    }

    if link.previous_hash != *expected_prev {
        return Err(ChainFault {
            code: ChainErrorCode::HashMismatch,
            index,
            detail: format!(
                "previous_hash {} does not match predecessor {}",
                link.previous_hash.short_hex(),
                expected_prev.short_hex()
            ),
        });
    }

    let bytes = content_bytes(&link.content).map_err(|e| ChainFault {
        code: ChainErrorCode::DecodeError,
        index,
        detail: format!("content could not be canonicalized: {e}"),
    })?;
    let recomputed = compute_link_hash(&link.previous_hash, &bytes);
    if recomputed != link.hash {
        return Err(ChainFault {
            code: ChainErrorCode::HashMismatch,
            index,
            detail: format!(
                "stored hash {} but content hashes to {}",
                link.hash.short_hex(),
                recomputed.short_hex()
            ),
        });
    }

    Ok(())
}
