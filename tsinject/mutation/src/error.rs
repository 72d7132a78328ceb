use thiserror::Error;
use tsinject_headscale::HeadscaleApiError;

pub type Result<T, E = MutationError> = std::result::Result<T, E>;

/// Failures that abort a pod mutation.
///
/// A failed mutation never produces a partially injected pod; the caller's
/// input value is left untouched and no output pod is returned.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("failed to acquire a pre-auth key: {0}")]
    PreAuthKey(#[from] HeadscaleApiError),

    #[error("pod has no spec")]
    PodSpecMissing,

    #[error("provided sidecar was empty")]
    EmptySidecar,
}
