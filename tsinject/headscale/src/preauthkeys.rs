use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::{ApiRequest, Client, RequestBody},
    error::{ApiOperation, HeadscaleApiError, Result},
};

/// A pre-authentication key issued by headscale.
///
/// The server owns these; this client only observes copies returned over
/// the wire. Any change, expiry included, is a new remote call, never a
/// local mutation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAuthKey {
    pub user: String,
    pub id: String,
    pub key: String,
    pub reusable: bool,
    pub ephemeral: bool,
    pub used: bool,
    pub expiration: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acl_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePreAuthKeyResponse {
    pre_auth_key: PreAuthKey,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPreAuthKeysResponse {
    #[serde(default)]
    pre_auth_keys: Vec<PreAuthKey>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePreAuthKeyRequest<'a> {
    user: &'a str,
    reusable: bool,
    ephemeral: bool,
    expiration: DateTime<Utc>,
    acl_tags: &'a [String],
}

#[derive(Debug, Serialize)]
struct ExpirePreAuthKeyRequest<'a> {
    user: &'a str,
    key: &'a str,
}

/// The narrow pre-auth key capability consumed by the mutation engine.
///
/// Implementations must not retry or reinterpret failures; transport errors
/// pass through unmodified.
pub trait PreAuthKeysApi {
    /// Issues one credential scoped to `user`. The server is the sole
    /// authority on key generation.
    fn create_pre_auth_key(
        &self,
        user: &str,
        reusable: bool,
        ephemeral: bool,
        expiration: DateTime<Utc>,
        acl_tags: Vec<String>,
    ) -> impl Future<Output = Result<PreAuthKey>> + Send;

    /// Returns all keys visible for `user`. Ordering is server-defined.
    fn list_pre_auth_keys(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Vec<PreAuthKey>>> + Send;

    /// Marks a key inactive. Expiring an already-expired key is not treated
    /// specially; whatever the server returns is surfaced verbatim.
    fn expire_pre_auth_key(
        &self,
        user: &str,
        key: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Pre-auth key operations, addressed through [`Client::pre_auth_keys`].
pub struct PreAuthKeyClient<'c> {
    client: &'c Client,
}

impl Client {
    pub fn pre_auth_keys(&self) -> PreAuthKeyClient<'_> {
        PreAuthKeyClient { client: self }
    }
}

impl PreAuthKeyClient<'_> {
    pub async fn create(
        &self,
        user: &str,
        reusable: bool,
        ephemeral: bool,
        expiration: DateTime<Utc>,
        acl_tags: Vec<String>,
    ) -> Result<PreAuthKey> {
        let body = serde_json::to_value(CreatePreAuthKeyRequest {
            user,
            reusable,
            ephemeral,
            expiration,
            acl_tags: &acl_tags,
        })
        .map_err(HeadscaleApiError::Encode)?;

        let response: CreatePreAuthKeyResponse = self
            .client
            .send(
                ApiOperation::CreatePreAuthKey,
                Method::POST,
                &["preauthkey"],
                ApiRequest {
                    content_type: Some("application/json"),
                    body: Some(RequestBody::Json(body)),
                    ..Default::default()
                },
            )
            .await?;

        Ok(response.pre_auth_key)
    }

    pub async fn list(&self, user: &str) -> Result<Vec<PreAuthKey>> {
        let response: ListPreAuthKeysResponse = self
            .client
            .send(
                ApiOperation::ListPreAuthKeys,
                Method::GET,
                &["preauthkey"],
                ApiRequest {
                    content_type: Some("application/json"),
                    params: vec![("user".to_string(), user.to_string())],
                    ..Default::default()
                },
            )
            .await?;

        Ok(response.pre_auth_keys)
    }

    pub async fn expire(&self, user: &str, key: &str) -> Result<()> {
        let body = serde_json::to_value(ExpirePreAuthKeyRequest { user, key })
            .map_err(HeadscaleApiError::Encode)?;

        self.client
            .send_no_content(
                ApiOperation::ExpirePreAuthKey,
                Method::POST,
                &["preauthkey", "expire"],
                ApiRequest {
                    body: Some(RequestBody::Json(body)),
                    ..Default::default()
                },
            )
            .await
    }
}

impl PreAuthKeysApi for Client {
    fn create_pre_auth_key(
        &self,
        user: &str,
        reusable: bool,
        ephemeral: bool,
        expiration: DateTime<Utc>,
        acl_tags: Vec<String>,
    ) -> impl Future<Output = Result<PreAuthKey>> + Send {
        async move {
            self.pre_auth_keys()
                .create(user, reusable, ephemeral, expiration, acl_tags)
                .await
        }
    }

    fn list_pre_auth_keys(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Vec<PreAuthKey>>> + Send {
        async move { self.pre_auth_keys().list(user).await }
    }

    fn expire_pre_auth_key(
        &self,
        user: &str,
        key: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        async move { self.pre_auth_keys().expire(user, key).await }
    }
}
