/// Errors produced when a verification outcome is turned into a gate decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error(
        "custody verification failed: chain_valid={chain_valid}, broken_at={broken_at:?}, \
         failed_anchors={failed_anchors}, signature_failures={signature_failures}"
    )]
    Invalid {
        chain_valid: bool,
        broken_at: Option<usize>,
        failed_anchors: usize,
        signature_failures: usize,
    },
}
