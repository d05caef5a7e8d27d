use custody_types::{Digest, LinkContent};
use sha2::{Digest as _, Sha256};

use crate::canonical::{canonicalize, CanonicalError};

/// Domain tag opening every framed link payload.
pub const CHAIN_DOMAIN: &[u8] = b"custody-chain-v1";

const SEPARATOR: &[u8] = b"|";

/// Hash of one link given its predecessor's hash and canonical content bytes.
///
/// The hashed payload is seven `|`-separated parts:
///
/// ```text
/// custody-chain-v1 | prev | <len(prev)> | <prev> | payload | <len(content)> | <content>
/// ```
///
/// `prev` is the 64-character lowercase hex of `previous_hash` (the genesis
/// sentinel for the first link) and lengths are ASCII decimal byte counts.
/// The length prefixes make the framing unambiguous even though content may
/// itself contain `|`.
pub fn compute_link_hash(previous_hash: &Digest, content_bytes: &[u8]) -> Digest {
    Digest::from_hash(Sha256::digest(framed_payload(previous_hash, content_bytes)).into())
}

/// The exact bytes hashed by [`compute_link_hash`].
pub fn framed_payload(previous_hash: &Digest, content_bytes: &[u8]) -> Vec<u8> {
    let prev = previous_hash.to_hex();
    let prev_len = prev.len().to_string();
    let content_len = content_bytes.len().to_string();

    let parts: [&[u8]; 7] = [
        CHAIN_DOMAIN,
        b"prev",
        prev_len.as_bytes(),
        prev.as_bytes(),
        b"payload",
        content_len.as_bytes(),
        content_bytes,
    ];
    parts.join(SEPARATOR)
}

/// Canonical bytes of a link's content, as fed into the chain hash.
pub fn content_bytes(content: &LinkContent) -> Result<Vec<u8>, CanonicalError> {
    canonicalize(content)
}

/// Canonicalize `content` and chain it onto `previous_hash`.
pub fn link_hash(previous_hash: &Digest, content: &LinkContent) -> Result<Digest, CanonicalError> {
    Ok(compute_link_hash(previous_hash, &content_bytes(content)?))
}
