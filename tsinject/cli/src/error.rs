use miette::Diagnostic;
use thiserror::Error;
use tsinject_headscale::HeadscaleApiError;

pub(crate) type CliResult<T, E = CliError> = std::result::Result<T, E>;

#[derive(Debug, Error, Diagnostic)]
pub(crate) enum CliError {
    #[error(transparent)]
    #[diagnostic(help(
        "check that HEADSCALE_CLI_ADDRESS and HEADSCALE_CLI_API_KEY are set and valid"
    ))]
    Headscale(#[from] HeadscaleApiError),

    #[error("expiration `{0}` is out of range")]
    ExpirationOutOfRange(String),
}
