use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::LinkContent;
use crate::digest::Digest;
use crate::error::TypeError;

/// Algorithm label written into every operator signature block.
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// One entry in the custody chain.
///
/// `content`, `previous_hash` and `hash` never change once the link exists.
/// The only permitted mutation is attaching a signature to an unsigned link,
/// via [`Link::with_signature`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub sequence: u64,
    pub content: LinkContent,
    pub previous_hash: Digest,
    pub hash: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<LinkSignature>,
}

impl Link {
    /// Returns `true` if this link follows the genesis sentinel.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_genesis()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The link without its signature block, as covered by the signature.
    pub fn signable(&self) -> SignableLink<'_> {
        SignableLink {
            sequence: self.sequence,
            content: &self.content,
            previous_hash: &self.previous_hash,
            hash: &self.hash,
        }
    }

    /// Attach a signature. Fails if one is already present.
    pub fn with_signature(mut self, signature: LinkSignature) -> Result<Self, TypeError> {
        if self.signature.is_some() {
            return Err(TypeError::AlreadySigned {
                sequence: self.sequence,
            });
        }
        self.signature = Some(signature);
        Ok(self)
    }
}

/// Borrowed view of a [`Link`] minus its signature.
///
/// Field names match [`Link`] so the canonical encoding equals the persisted
/// record with the `signature` key removed.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SignableLink<'a> {
    pub sequence: u64,
    pub content: &'a LinkContent,
    pub previous_hash: &'a Digest,
    pub hash: &'a Digest,
}

/// Operator signature block.
///
/// Signature and key are kept as hex strings: they are untrusted input on the
/// verification side and are parsed only when checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSignature {
    pub signature: String,
    pub public_key: String,
    pub signer_id: String,
    pub signed_at: DateTime<Utc>,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    SIGNATURE_ALGORITHM.to_string()
}

/// One persisted record as read back from storage.
///
/// A record that fails to decode keeps its place in the sequence so chain
/// verification can report it at the right index instead of silently
/// closing the gap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRecord {
    Decoded(Link),
    Malformed {
        /// 1-based position in the log.
        position: usize,
        error: String,
    },
}

impl LinkRecord {
    pub fn link(&self) -> Option<&Link> {
        match self {
            Self::Decoded(link) => Some(link),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<Link> for LinkRecord {
    fn from(link: Link) -> Self {
        Self::Decoded(link)
    }
}

/// Position of the chain tail, passed into and returned from every append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub last_hash: Digest,
    pub next_sequence: u64,
}

impl ChainState {
    /// State of an empty chain.
    pub const fn genesis() -> Self {
        Self {
            last_hash: Digest::GENESIS,
            next_sequence: 0,
        }
    }

    /// State immediately after `link`.
    pub fn after(link: &Link) -> Self {
        Self {
            last_hash: link.hash,
            next_sequence: link.sequence + 1,
        }
    }

    /// Returns `true` if nothing has been appended yet.
    pub fn is_genesis(&self) -> bool {
        self.next_sequence == 0 && self.last_hash.is_genesis()
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}
