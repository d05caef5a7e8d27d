use custody_types::{Digest, Link};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Side of a sibling in a Merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Binary SHA-256 Merkle tree over link hashes.
///
/// Leaves are taken in the order given (chain order) and are never sorted or
/// re-hashed. Parents are `SHA256(left || right)` over the raw 32-byte values;
/// an odd level pairs its last node with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Digest,
    /// Level 0 = leaves, last element = root.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree from leaf digests.
    ///
    /// An empty list yields `SHA256("")`. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self {
                root: Digest::of(b""),
                levels: vec![],
            };
        }

        let mut levels = vec![leaves];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }

        let root = levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(|| Digest::of(b""));
        Self { root, levels }
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaf = *self.levels.first()?.get(index)?;

        let mut path = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_idx, side) = if idx % 2 == 0 {
                (idx + 1, Side::Right)
            } else {
                (idx - 1, Side::Left)
            };
            // Odd level: the last node is its own partner.
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            path.push(ProofStep { sibling, side });
            idx /= 2;
        }

        Some(MerkleProof {
            index,
            leaf,
            path,
            root: self.root,
        })
    }
}

/// One step of an inclusion proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    /// Which side the sibling sits on.
    pub side: Side,
}

/// Merkle inclusion proof for a single link hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf position within the batch.
    pub index: usize,
    pub leaf: Digest,
    pub path: Vec<ProofStep>,
    pub root: Digest,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path.
    pub fn verify(&self) -> bool {
        self.computed_root() == self.root
    }

    /// Check the proof against an externally trusted root.
    pub fn verify_against(&self, root: &Digest) -> bool {
        self.root == *root && self.verify()
    }

    fn computed_root(&self) -> Digest {
        self.path.iter().fold(self.leaf, |current, step| match step.side {
            Side::Left => hash_pair(&step.sibling, &current),
            Side::Right => hash_pair(&current, &step.sibling),
        })
    }
}

/// Merkle root over `leaf_hashes` in the given order.
pub fn build_root(leaf_hashes: &[Digest]) -> Digest {
    MerkleTree::from_leaves(leaf_hashes.to_vec()).root()
}

/// Merkle root over the hashes of `links`, in slice order.
pub fn build_batch_root(links: &[Link]) -> Digest {
    let leaves: Vec<Digest> = links.iter().map(|link| link.hash).collect();
    build_root(&leaves)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch is empty")]
    Empty,

    #[error("batch is not contiguous: expected sequence {expected}, found {found}")]
    Gap { expected: u64, found: u64 },

    #[error("batch of {len} links starting at {first} runs past the last sequence number")]
    SequenceOverflow { first: u64, len: usize },
}

/// A contiguous run of links folded into one root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub leaf_hashes: Vec<Digest>,
    pub root: Digest,
}

impl Batch {
    /// Build a batch, rejecting empty or non-contiguous input.
    pub fn from_links(links: &[Link]) -> Result<Self, BatchError> {
        let (first, last) = match (links.first(), links.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(BatchError::Empty),
        };
        for (offset, link) in links.iter().enumerate() {
            let expected = u64::try_from(offset)
                .ok()
                .and_then(|offset| first.sequence.checked_add(offset))
                .ok_or(BatchError::SequenceOverflow {
                    first: first.sequence,
                    len: links.len(),
                })?;
            if link.sequence != expected {
                return Err(BatchError::Gap {
                    expected,
                    found: link.sequence,
                });
            }
        }

        let leaf_hashes: Vec<Digest> = links.iter().map(|link| link.hash).collect();
        let root = build_root(&leaf_hashes);
        Ok(Self {
            first_sequence: first.sequence,
            last_sequence: last.sequence,
            leaf_hashes,
            root,
        })
    }

    pub fn len(&self) -> usize {
        self.leaf_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_hashes.is_empty()
    }

    /// Inclusion proof for the link with `sequence`, if it is in the batch.
    pub fn proof_for(&self, sequence: u64) -> Option<MerkleProof> {
        if sequence < self.first_sequence || sequence > self.last_sequence {
            return None;
        }
        let index = usize::try_from(sequence - self.first_sequence).ok()?;
        MerkleTree::from_leaves(self.leaf_hashes.clone()).proof(index)
    }
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use custody_types::{ChainState, LinkContent, OpaquePayload};

    use super::*;
    use crate::chain::append_link;

    fn leaf(seed: u8) -> Digest {
        Digest::of(&[seed])
    }

    fn concat_hash(a: &Digest, b: &Digest) -> Digest {
        let mut bytes = a.as_bytes().to_vec();
        bytes.extend_from_slice(b.as_bytes());
        Digest::of(&bytes)
    }

    fn build_chain(n: usize) -> Vec<Link> {
        let mut state = ChainState::genesis();
        (0..n)
            .map(|i| {
                let (link, next) =
                    append_link(&state, LinkContent::Opaque(OpaquePayload::new(vec![i as u8]))).unwrap();
                state = next;
                link
            })
            .collect()
    }

    #[test]
    fn empty_root_is_sha256_of_nothing() {
        assert_eq!(
            build_root(&[]).to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(MerkleTree::from_leaves(vec![]).leaf_count(), 0);
    }

    #[test]
    fn single_leaf_is_root() {
        assert_eq!(build_root(&[leaf(1)]), leaf(1));
    }

    #[test]
    fn parent_is_plain_concatenation_hash() {
        let (a, b) = (leaf(1), leaf(2));
        assert_eq!(build_root(&[a, b]), concat_hash(&a, &b));
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let expected = concat_hash(&concat_hash(&a, &b), &concat_hash(&c, &c));
        assert_eq!(build_root(&[a, b, c]), expected);
    }

    #[test]
    fn root_is_order_sensitive() {
        assert_ne!(build_root(&[leaf(1), leaf(2)]), build_root(&[leaf(2), leaf(1)]));
    }

    #[test]
    fn proof_verifies_for_all_leaves() {
        let leaves: Vec<Digest> = (0..7).map(leaf).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());
        for (i, expected) in leaves.iter().enumerate() {
            let proof = tree.proof(i).expect("proof should exist");
            assert_eq!(proof.leaf, *expected);
            assert!(proof.verify(), "proof for leaf {i} should verify");
        }
    }

    #[test]
    fn power_of_two_proof_depth() {
        let tree = MerkleTree::from_leaves((0..8).map(leaf).collect());
        for i in 0..8 {
            assert_eq!(tree.proof(i).unwrap().path.len(), 3);
        }
    }

    #[test]
    fn proof_out_of_bounds_returns_none() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2)]);
        assert!(tree.proof(5).is_none());
    }

    #[test]
    fn tampered_proof_fails() {
        let tree = MerkleTree::from_leaves((0..4).map(leaf).collect());
        let mut proof = tree.proof(0).unwrap();
        proof.leaf = leaf(99);
        assert!(!proof.verify());
        assert!(!proof.verify_against(&tree.root()));
    }

    #[test]
    fn proof_against_other_root_fails() {
        let tree = MerkleTree::from_leaves((0..4).map(leaf).collect());
        let proof = tree.proof(1).unwrap();
        assert!(proof.verify_against(&tree.root()));
        assert!(!proof.verify_against(&leaf(42)));
    }

    #[test]
    fn batch_root_matches_leaf_root() {
        let links = build_chain(5);
        let batch = Batch::from_links(&links).unwrap();
        assert_eq!(batch.root, build_batch_root(&links));
        assert_eq!((batch.first_sequence, batch.last_sequence), (0, 4));
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn batch_rejects_gaps_and_empty_input() {
        let mut links = build_chain(4);
        links.remove(2);
        assert_eq!(
            Batch::from_links(&links),
            Err(BatchError::Gap { expected: 2, found: 3 })
        );
        assert_eq!(Batch::from_links(&[]), Err(BatchError::Empty));
    }

    #[test]
    fn batch_at_last_sequence_number() {
        let mut links = build_chain(2);
        links[0].sequence = u64::MAX;
        let batch = Batch::from_links(&links[..1]).unwrap();
        assert_eq!(batch.first_sequence, u64::MAX);
        assert_eq!(batch.last_sequence, u64::MAX);
        assert!(batch.proof_for(u64::MAX).unwrap().verify());

        links[1].sequence = 0;
        assert_eq!(
            Batch::from_links(&links),
            Err(BatchError::SequenceOverflow { first: u64::MAX, len: 2 })
        );
    }

    #[test]
    fn batch_proof_by_sequence() {
        let links = build_chain(6);
        let batch = Batch::from_links(&links[2..]).unwrap();
        let proof = batch.proof_for(4).unwrap();
        assert_eq!(proof.leaf, links[4].hash);
        assert_eq!(proof.index, 2);
        assert!(proof.verify_against(&batch.root));
        assert!(batch.proof_for(1).is_none());
        assert!(batch.proof_for(6).is_none());
    }
}
