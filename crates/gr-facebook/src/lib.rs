//! gr-facebook: Facebook group gateway for group-relay
//!
//! Receives Graph API group webhooks, asks the LLM for a reply and posts it
//! back as a comment on the originating post or comment.

pub mod api;
pub mod error;
pub mod handler;
pub mod types;
pub mod webhook;

pub use api::{FacebookApi, ReplyPublisher};
pub use error::{FacebookError, Result};
pub use handler::{ChangeOutcome, DispatchReport, EventDispatcher, ReplyStatus};
pub use types::{ReplyRequest, WebhookPayload};
pub use webhook::{WebhookState, create_webhook_router, start_webhook_server};
