//! Facebook Graph API client

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use gr_core::FacebookConfig;

use crate::error::{FacebookError, Result};
use crate::types::ReplyRequest;

/// Something that posts reply comments
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    /// Post `reply.text` as a comment on `reply.target_id`.
    ///
    /// Returns the id of the created comment when the Graph API reports one.
    async fn publish(&self, reply: &ReplyRequest) -> Result<Option<String>>;
}

/// Facebook Graph API client
#[derive(Clone)]
pub struct FacebookApi {
    client: Client,
    graph_api_url: String,
    access_token: Option<String>,
    verify_token: String,
}

impl FacebookApi {
    /// Create a new Graph API client
    pub fn new(config: &FacebookConfig) -> Self {
        Self {
            client: Client::new(),
            graph_api_url: config.graph_api_url.trim_end_matches('/').to_string(),
            access_token: config.page_access_token.clone().filter(|t| !t.is_empty()),
            verify_token: config.verify_token.clone(),
        }
    }

    /// Whether a page access token is configured
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Verify webhook challenge for Facebook webhook setup
    ///
    /// Succeeds with the challenge when a mode is given and the token matches.
    pub fn verify_webhook(
        &self,
        mode: Option<&str>,
        token: Option<&str>,
        challenge: Option<&str>,
    ) -> Result<String> {
        let mode_present = mode.is_some_and(|m| !m.is_empty());

        if mode_present && token == Some(self.verify_token.as_str()) {
            info!("Webhook verified");
            Ok(challenge.unwrap_or_default().to_string())
        } else {
            error!("Webhook verification failed: missing mode or token mismatch");
            Err(FacebookError::WebhookVerificationFailed)
        }
    }

    /// Post a comment on a Graph object
    pub async fn post_comment(&self, object_id: &str, message: &str) -> Result<CommentResponse> {
        let Some(access_token) = self.access_token.as_deref() else {
            error!("FACEBOOK_PAGE_ACCESS_TOKEN is not set; skipping reply to {}", object_id);
            return Err(FacebookError::AccessTokenNotSet);
        };

        if !is_valid_object_id(object_id) {
            error!("Refusing to reply to malformed object id {:?}", object_id);
            return Err(FacebookError::InvalidTarget(object_id.to_string()));
        }

        let url = self.comments_url(object_id)?;

        let payload = CommentPayload {
            message,
            access_token,
        };

        debug!("Posting comment to {}: {}", object_id, message);

        let response = self.client.post(url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = graph_error_message(&body).unwrap_or(body);
            error!("Error sending reply to Facebook: {} - {}", status, detail);
            return Err(FacebookError::Api(format!("{} - {}", status, detail)));
        }

        let body = response.text().await?;
        let comment: CommentResponse = serde_json::from_str(&body).unwrap_or_default();
        info!("Successfully replied to object {}", object_id);

        Ok(comment)
    }

    /// `{graph}/{object_id}/comments`, with the id as a single encoded segment
    fn comments_url(&self, object_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.graph_api_url)
            .map_err(|e| FacebookError::Config(format!("Invalid Graph API URL {}: {}", self.graph_api_url, e)))?;

        url.path_segments_mut()
            .map_err(|_| FacebookError::Config(format!("Graph API URL cannot have a path: {}", self.graph_api_url)))?
            .pop_if_empty()
            .push(object_id)
            .push("comments");

        Ok(url)
    }
}

/// Graph object ids look like `123` or `{group}_{post}`
fn is_valid_object_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl ReplyPublisher for FacebookApi {
    async fn publish(&self, reply: &ReplyRequest) -> Result<Option<String>> {
        let comment = self.post_comment(&reply.target_id, &reply.text).await?;
        Ok(comment.id)
    }
}

/// Pull `error.message` out of a Graph error body
fn graph_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<GraphErrorResponse>(body)
        .ok()
        .and_then(|e| e.error.message)
}

// =============================================================================
// Data structures for the Graph comments endpoint
// =============================================================================

#[derive(Debug, Serialize)]
struct CommentPayload<'a> {
    message: &'a str,
    access_token: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentResponse {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    message: Option<String>,
}
