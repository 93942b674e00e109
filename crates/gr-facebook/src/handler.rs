//! Webhook event dispatcher for Facebook group notifications

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use gr_core::{CompletionClient, CompletionOutcome};

use crate::api::ReplyPublisher;
use crate::error::FacebookError;
use crate::types::{IncomingMessage, ReplyRequest, WebhookPayload};

/// What happened to the reply for one change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The comment was created
    Published { comment_id: Option<String> },
    /// No page access token; the Graph API was not called
    Skipped,
    /// The Graph API call failed
    Failed(String),
}

/// Result of handling one qualifying change
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    pub target_id: String,
    pub completion: CompletionOutcome,
    pub reply: ReplyStatus,
}

/// Result of handling one webhook delivery
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Whether the delivery was a group notification
    pub is_group: bool,
    /// Changes present in the delivery, qualifying or not
    pub changes_seen: usize,
    /// One entry per qualifying change, in arrival order
    pub outcomes: Vec<ChangeOutcome>,
}

impl DispatchReport {
    /// Number of replies that reached the Graph API successfully
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.reply, ReplyStatus::Published { .. }))
            .count()
    }
}

/// Turns group notifications into reply comments
pub struct EventDispatcher {
    completion: Arc<dyn CompletionClient>,
    publisher: Arc<dyn ReplyPublisher>,
}

impl EventDispatcher {
    /// Create a new dispatcher
    pub fn new(completion: Arc<dyn CompletionClient>, publisher: Arc<dyn ReplyPublisher>) -> Self {
        Self {
            completion,
            publisher,
        }
    }

    /// Parse a raw delivery body and dispatch it.
    ///
    /// Bodies that do not parse are logged and produce an empty report.
    pub async fn dispatch_body(&self, body: &[u8]) -> DispatchReport {
        match WebhookPayload::parse(body) {
            Ok(payload) => self.dispatch(&payload).await,
            Err(e) => {
                warn!("Ignoring unparsable webhook body: {}", e);
                DispatchReport::default()
            }
        }
    }

    /// Handle every qualifying change of a delivery, one after another
    pub async fn dispatch(&self, payload: &WebhookPayload) -> DispatchReport {
        let mut report = DispatchReport {
            is_group: payload.is_group(),
            ..Default::default()
        };

        if !report.is_group {
            debug!("Ignoring webhook for object {:?}", payload.object);
            return report;
        }

        for change in payload.changes() {
            report.changes_seen += 1;

            let Some(incoming) = change.incoming_message() else {
                debug!("Skipping change with field {:?}", change.field);
                continue;
            };

            let outcome = self.handle_message(&incoming).await;
            report.outcomes.push(outcome);
        }

        report
    }

    /// Ask for a completion, then post it as a reply
    pub async fn handle_message(&self, incoming: &IncomingMessage) -> ChangeOutcome {
        info!(
            "Received message: \"{}\" on object {}",
            incoming.message, incoming.target_id
        );

        let completion = self.completion.complete(&incoming.message).await;
        if let CompletionOutcome::Fallback { error, .. } = &completion {
            warn!("Using fallback reply for {}: {}", incoming.target_id, error);
        }

        let reply = ReplyRequest {
            target_id: incoming.target_id.clone(),
            text: completion.text().to_string(),
        };

        let status = match self.publisher.publish(&reply).await {
            Ok(comment_id) => ReplyStatus::Published { comment_id },
            Err(FacebookError::AccessTokenNotSet) => ReplyStatus::Skipped,
            Err(e) => {
                error!("Failed to reply to object {}: {}", reply.target_id, e);
                ReplyStatus::Failed(e.to_string())
            }
        };

        ChangeOutcome {
            target_id: reply.target_id,
            completion,
            reply: status,
        }
    }
}
