//! Startup verification for the custody chain.
//!
//! [`run_verification`] walks the hash chain, checks ledger anchors and
//! operator signatures, and folds everything into one
//! [`VerificationReport`]. A failing phase never stops the later ones, so
//! the report always shows the full picture.

pub mod error;
pub mod options;
pub mod orchestrator;
pub mod report;

pub use error::VerifyError;
pub use options::VerificationOptions;
pub use orchestrator::run_verification;
pub use report::{RecordError, RecordSource, VerificationReport};
