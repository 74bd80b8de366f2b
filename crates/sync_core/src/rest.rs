//! HTTP collaborators: login, history fetches, unread counts and the
//! attachment store. Request/response only; the engine never persists
//! anything behind these.

use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{GroupId, UserId, UserProfile},
    protocol::{DirectMessagePayload, GroupMessagePayload},
};

use crate::{outbound::AttachmentSource, session::Session, store::Attachment};

pub struct RestClient {
    http: Client,
    server_url: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginOutcome {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupUnreadCount {
    pub group_id: GroupId,
    pub count: u64,
}

#[derive(Debug, Deserialize)]
struct FileUploadResponse {
    file_url: String,
    file_name: String,
    file_type: String,
}

impl RestClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, reqwest::Error> {
        self.http
            .post(format!("{}/users/login", self.server_url))
            .json(&LoginRequest { email, password })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn fetch_direct_history(
        &self,
        session: &Session,
        peer: &UserId,
    ) -> Result<Vec<DirectMessagePayload>, reqwest::Error> {
        self.http
            .get(format!("{}/messages/{peer}", self.server_url))
            .bearer_auth(&session.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn fetch_group_history(
        &self,
        session: &Session,
        group: &GroupId,
    ) -> Result<Vec<GroupMessagePayload>, reqwest::Error> {
        self.http
            .get(format!(
                "{}/group-messages/{group}/messages",
                self.server_url
            ))
            .bearer_auth(&session.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn fetch_group_unread_counts(
        &self,
        session: &Session,
    ) -> Result<Vec<GroupUnreadCount>, reqwest::Error> {
        self.http
            .get(format!("{}/group-messages/unread", self.server_url))
            .bearer_auth(&session.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Uploads one attachment and returns its canonical location. The
    /// caller only references the attachment after this succeeds.
    pub async fn upload_file(
        &self,
        session: &Session,
        attachment: AttachmentSource,
    ) -> Result<Attachment, reqwest::Error> {
        let part = multipart::Part::bytes(attachment.bytes)
            .file_name(attachment.filename.clone())
            .mime_str(&attachment.mime_type)?;
        let form = multipart::Form::new().part("file", part);
        let response: FileUploadResponse = self
            .http
            .post(format!("{}/upload/file", self.server_url))
            .bearer_auth(&session.auth_token)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Attachment {
            url: response.file_url,
            name: response.file_name,
            mime_type: response.file_type,
        })
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
