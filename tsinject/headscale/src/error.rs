use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = HeadscaleApiError> = std::result::Result<T, E>;

/// Operations performed against the headscale API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    CreatePreAuthKey,
    ListPreAuthKeys,
    ExpirePreAuthKey,
    CreateUser,
    ListUsers,
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let as_str = match self {
            Self::CreatePreAuthKey => "creating a pre-auth key",
            Self::ListPreAuthKeys => "listing pre-auth keys",
            Self::ExpirePreAuthKey => "expiring a pre-auth key",
            Self::CreateUser => "creating a user",
            Self::ListUsers => "listing users",
        };

        f.write_str(as_str)
    }
}

#[derive(Debug, Error)]
pub enum HeadscaleApiError {
    #[error("headscale API address is missing: set HEADSCALE_CLI_ADDRESS or pass an address explicitly")]
    MissingAddress,

    #[error("failed to parse headscale API address `{address}`: {source}")]
    AddressParse {
        address: String,
        source: url::ParseError,
    },

    #[error("headscale API address `{0}` cannot be used as a base URL")]
    AddressNotBase(String),

    #[error("headscale API key is missing: set HEADSCALE_CLI_API_KEY or pass a key explicitly")]
    MissingApiKey,

    #[error("failed to construct the HTTP client: {0}")]
    HttpClient(reqwest::Error),

    #[error("failed to build the HTTP request: {0}")]
    BuildRequest(reqwest::Error),

    #[error("invalid request header `{0}`")]
    InvalidHeader(String),

    #[error("failed to encode request body as JSON: {0}")]
    Encode(serde_json::Error),

    #[error("{operation} failed: {source}")]
    Request {
        operation: ApiOperation,
        source: reqwest::Error,
    },

    #[error("{operation} failed with status code {status}: {body}")]
    UnexpectedStatus {
        operation: ApiOperation,
        status: StatusCode,
        /// Best-effort snippet of the response body, for diagnostics only.
        body: String,
    },

    #[error("{operation} failed: could not decode response body: {source}")]
    Decode {
        operation: ApiOperation,
        source: serde_json::Error,
    },
}
