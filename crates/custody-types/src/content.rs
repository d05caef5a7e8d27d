use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Digest;

/// Application payload carried by a custody link.
///
/// Serialized with an internal `kind` tag so the canonical form of every
/// variant is a flat JSON object. Unknown producer shapes go through
/// [`LinkContent::Opaque`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkContent {
    /// Metadata for one downloaded result snapshot.
    Snapshot(SnapshotMetadata),
    /// Normalized vote totals for one scope.
    Results(ResultsSummary),
    /// Raw bytes the producer does not model.
    Opaque(OpaquePayload),
}

impl LinkContent {
    /// The serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Results(_) => "results",
            Self::Opaque(_) => "opaque",
        }
    }
}

/// Snapshot metadata recorded when a source document is captured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub source_url: String,
    pub timestamp_utc: String,
    pub software_version: String,
    /// SHA-256 of the raw snapshot bytes.
    pub snapshot_sha256: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_code: Option<String>,
    /// Producer-specific fields that are not modelled.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Vote totals for one scope at one capture time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub election: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_code: Option<String>,
    pub timestamp_utc: String,
    pub registered_voters: u64,
    pub total_votes: u64,
    pub valid_votes: u64,
    pub null_votes: u64,
    pub blank_votes: u64,
    #[serde(default)]
    pub candidates: Vec<CandidateTally>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    /// Ballot position.
    pub slot: u32,
    pub votes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
}

/// Forward-compatible fallback: bytes plus an optional media type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaquePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl OpaquePayload {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: None,
            data: data.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
