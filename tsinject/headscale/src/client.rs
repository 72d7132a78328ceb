use std::{fmt, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderName, HeaderValue},
    Method, Request, Url,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::error::{ApiOperation, HeadscaleApiError, Result};

/// Environment variable holding the headscale API base address.
pub const ADDRESS_ENV: &str = "HEADSCALE_CLI_ADDRESS";
/// Environment variable holding the headscale API bearer token.
pub const API_KEY_ENV: &str = "HEADSCALE_CLI_API_KEY";

pub const DEFAULT_USER_AGENT: &str = "tailscale-sidecar-injector";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const BASE_PATH: [&str; 2] = ["api", "v1"];

/// How much of a failed response body is carried in the error.
const BODY_SNIPPET_LEN: usize = 256;

/// Connection settings for [`Client`].
///
/// Built once at process start and passed into [`Client::new`]. Nothing in
/// this crate reads the environment after construction, so concurrent calls
/// share one immutable view of the configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub address: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new<A: Into<String>, K: Into<String>>(address: A, api_key: K) -> Self {
        ClientConfig {
            address: address.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads [`ADDRESS_ENV`] and [`API_KEY_ENV`].
    ///
    /// Unset or malformed variables resolve to empty strings and surface
    /// later as configuration errors from [`Client::new`].
    pub fn from_env() -> Self {
        ClientConfig {
            address: std::env::var(ADDRESS_ENV).unwrap_or_default(),
            api_key: std::env::var(API_KEY_ENV).unwrap_or_default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    // The api key must never reach the logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Authenticated transport for the headscale API.
///
/// Read-only after construction; share it freely across concurrent
/// mutation calls. Every operation is one blocking round trip bounded by
/// the configured timeout; dropping the returned future aborts the
/// in-flight request, so callers impose deadlines by wrapping the call.
pub struct Client {
    base_url: Url,
    api_key: String,
    user_agent: &'static str,
    http: reqwest::Client,
}

impl fmt::Debug for Client {
    // The api key must never reach the logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// One logical API call before it is turned into an HTTP request.
#[derive(Debug, Default)]
pub struct ApiRequest {
    pub body: Option<RequestBody>,
    pub content_type: Option<&'static str>,
    /// Extra headers; these win over the content-type default.
    pub headers: Vec<(String, String)>,
    /// Query parameters, appended onto any query already present in the
    /// base address. Repeated keys are appended, not replaced.
    pub params: Vec<(String, String)>,
}

#[derive(Debug)]
pub enum RequestBody {
    /// Sent verbatim.
    Raw(Vec<u8>),
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON.
    Json(serde_json::Value),
}

impl Client {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(HeadscaleApiError::MissingAddress);
        }

        let base_url =
            Url::parse(&config.address).map_err(|source| HeadscaleApiError::AddressParse {
                address: config.address.clone(),
                source,
            })?;
        if base_url.cannot_be_a_base() {
            return Err(HeadscaleApiError::AddressNotBase(config.address.clone()));
        }

        if config.api_key.is_empty() {
            return Err(HeadscaleApiError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(HeadscaleApiError::HttpClient)?;

        Ok(Client {
            base_url,
            api_key: config.api_key.clone(),
            user_agent: DEFAULT_USER_AGENT,
            http,
        })
    }

    fn build_path(&self, parts: &[&str]) -> Url {
        let mut url = self.base_url.clone();

        match url.path_segments_mut() {
            Ok(mut segments) => {
                segments.pop_if_empty();
                segments.extend(BASE_PATH);
                segments.extend(parts);
            }
            // Ruled out by the cannot_be_a_base check in `new`.
            Err(()) => {}
        }

        url
    }

    pub(crate) fn build_request(
        &self,
        method: Method,
        parts: &[&str],
        api_request: ApiRequest,
    ) -> Result<Request> {
        let mut url = self.build_path(parts);

        if !api_request.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &api_request.params {
                pairs.append_pair(key, value);
            }
        }

        let body = match api_request.body {
            None => Vec::new(),
            Some(RequestBody::Raw(bytes)) => bytes,
            Some(RequestBody::Text(text)) => text.into_bytes(),
            Some(RequestBody::Json(value)) => {
                serde_json::to_vec(&value).map_err(HeadscaleApiError::Encode)?
            }
        };

        let mut builder = self
            .http
            .request(method, url)
            .header(header::USER_AGENT, self.user_agent)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .body(body);

        if let Some(content_type) = api_request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        let mut request = builder.build().map_err(HeadscaleApiError::BuildRequest)?;

        for (name, value) in &api_request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HeadscaleApiError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| HeadscaleApiError::InvalidHeader(value.clone()))?;
            request.headers_mut().insert(name, value);
        }

        Ok(request)
    }

    /// Executes `api_request` and decodes the response body as JSON.
    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        operation: ApiOperation,
        method: Method,
        parts: &[&str],
        api_request: ApiRequest,
    ) -> Result<T> {
        let request = self.build_request(method, parts, api_request)?;
        let body = self.dispatch(operation, request).await?;

        serde_json::from_slice(&body).map_err(|source| HeadscaleApiError::Decode {
            operation,
            source,
        })
    }

    /// Executes `api_request` and discards the response body.
    pub(crate) async fn send_no_content(
        &self,
        operation: ApiOperation,
        method: Method,
        parts: &[&str],
        api_request: ApiRequest,
    ) -> Result<()> {
        let request = self.build_request(method, parts, api_request)?;
        self.dispatch(operation, request).await?;

        Ok(())
    }

    async fn dispatch(&self, operation: ApiOperation, request: Request) -> Result<Bytes> {
        debug!(
            method = %request.method(),
            url = %request.url(),
            query = request.url().query().unwrap_or_default(),
            %operation,
            "making http request",
        );

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| HeadscaleApiError::Request { operation, source })?;

        handle_response(operation, response).await
    }
}

/// Classifies a response: `[200, 300)` is success, anything else fails with
/// the status code and a best-effort body snippet. No retries.
async fn handle_response(
    operation: ApiOperation,
    response: reqwest::Response,
) -> Result<Bytes> {
    let status = response.status();

    if !status.is_success() {
        error!(%status, %operation, "unexpected status code");
        let body = response.bytes().await.unwrap_or_default();
        let snippet: String = String::from_utf8_lossy(&body)
            .chars()
            .take(BODY_SNIPPET_LEN)
            .collect();
        debug!(%operation, body = %snippet, "response");

        return Err(HeadscaleApiError::UnexpectedStatus {
            operation,
            status,
            body: snippet,
        });
    }

    response
        .bytes()
        .await
        .map_err(|source| HeadscaleApiError::Request { operation, source })
}
