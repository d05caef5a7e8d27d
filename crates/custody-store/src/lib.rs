//! Persistence for the custody chain.
//!
//! Links and anchor records are stored as JSON lines, one object per line,
//! in append order. Reading never fails on a bad line: undecodable lines are
//! returned in place so verification can report them.

pub mod anchors;
pub mod error;
pub mod jsonl;
pub mod keys;
pub mod log;

pub use anchors::{AnchorLog, AnchorLogContents};
pub use error::{KeyStoreError, StoreError};
pub use jsonl::MalformedLine;
pub use keys::{KeyStore, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use log::{read_records_at, LinkLog, SyncMode};
