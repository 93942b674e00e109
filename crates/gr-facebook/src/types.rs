//! Graph API group webhook types
//!
//! Every field is optional so that unexpected shapes deserialize and are
//! then skipped instead of failing the whole delivery.

use serde::Deserialize;

/// `object` value of group notifications
pub const OBJECT_GROUP: &str = "group";

/// Change fields the relay answers
pub const SUPPORTED_FIELDS: [&str; 2] = ["comments", "posts"];

/// Webhook delivery body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    pub entry: Option<Vec<WebhookEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEntry {
    pub id: Option<String>,
    pub time: Option<i64>,
    pub changes: Option<Vec<WebhookChange>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookChange {
    pub field: Option<String>,
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    pub message: Option<String>,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
}

/// Message text and the Graph object it was posted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub target_id: String,
    pub message: String,
}

/// A reply to post as a comment on `target_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub target_id: String,
    pub text: String,
}

impl WebhookPayload {
    /// Parse a raw delivery body
    pub fn parse(body: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Whether this is a group notification
    pub fn is_group(&self) -> bool {
        self.object.as_deref() == Some(OBJECT_GROUP)
    }

    /// All changes across all entries, in delivery order
    pub fn changes(&self) -> impl Iterator<Item = &WebhookChange> {
        self.entry
            .iter()
            .flatten()
            .filter_map(|entry| entry.changes.as_ref())
            .flatten()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl WebhookChange {
    /// Whether the change field is one the relay answers
    pub fn is_supported_field(&self) -> bool {
        self.field
            .as_deref()
            .is_some_and(|field| SUPPORTED_FIELDS.contains(&field))
    }

    /// Extract the message and its target, if the change carries both.
    ///
    /// The target is the post id when present, otherwise the comment id.
    pub fn incoming_message(&self) -> Option<IncomingMessage> {
        if !self.is_supported_field() {
            return None;
        }

        let value = self.value.as_ref()?;
        let message = non_empty(&value.message)?;
        let target_id = non_empty(&value.post_id).or_else(|| non_empty(&value.comment_id))?;

        Some(IncomingMessage {
            target_id: target_id.to_string(),
            message: message.to_string(),
        })
    }
}
