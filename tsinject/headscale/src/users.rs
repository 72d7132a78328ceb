use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::{ApiRequest, Client, RequestBody},
    error::{ApiOperation, HeadscaleApiError, Result},
};

/// A headscale user. Server-owned, observed read-only.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub email: String,
    pub provider_id: String,
    pub provider: String,
    pub profile_pic_url: String,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    // The field really is singular on the wire.
    #[serde(rename = "user", default)]
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    name: &'a str,
}

/// User operations, addressed through [`Client::users`].
pub struct UserClient<'c> {
    client: &'c Client,
}

impl Client {
    pub fn users(&self) -> UserClient<'_> {
        UserClient { client: self }
    }
}

impl UserClient<'_> {
    pub async fn create(&self, name: &str) -> Result<User> {
        let body = serde_json::to_value(CreateUserRequest { name })
            .map_err(HeadscaleApiError::Encode)?;

        self.client
            .send(
                ApiOperation::CreateUser,
                Method::POST,
                &["user"],
                ApiRequest {
                    body: Some(RequestBody::Json(body)),
                    ..Default::default()
                },
            )
            .await
    }

    /// Lists users. The remote API answers this on `POST /user` with an
    /// empty body, not on `GET`; reproduced as-is since the server expects
    /// it.
    pub async fn list(&self) -> Result<Vec<User>> {
        let response: ListUsersResponse = self
            .client
            .send(
                ApiOperation::ListUsers,
                Method::POST,
                &["user"],
                ApiRequest::default(),
            )
            .await?;

        Ok(response.users)
    }
}
