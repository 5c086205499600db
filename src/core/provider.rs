//! Delivery provider abstraction and the outbound message model.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::ProviderError;
use crate::core::task::TaskRecord;
use crate::util::serde::{OwnerId, ProviderId};

/// Message handed to a provider for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Primary recipients.
    pub to: BTreeSet<String>,
    /// Carbon-copy recipients.
    pub cc: BTreeSet<String>,
    /// Blind-carbon-copy recipients.
    pub bcc: BTreeSet<String>,
    /// Subject line.
    pub subject: String,
    /// Rich body.
    pub html_body: String,
    /// Plain body.
    pub text_body: String,
    /// Reply-to address, from the task's `reply_to` variable.
    pub reply_to: Option<String>,
    /// Open tracking; `track_opens` variable, default on.
    pub track_opens: bool,
    /// Click tracking; `track_clicks` variable, default on.
    pub track_clicks: bool,
}

impl From<&TaskRecord> for OutboundMessage {
    fn from(record: &TaskRecord) -> Self {
        Self {
            to: record.recipients.to.clone(),
            cc: record.recipients.cc.clone(),
            bcc: record.recipients.bcc.clone(),
            subject: record.subject.clone(),
            html_body: record.html_body.clone(),
            text_body: record.text_body.clone(),
            reply_to: record.reply_to().map(str::to_owned),
            track_opens: record.flag("track_opens", true),
            track_clicks: record.flag("track_clicks", true),
        }
    }
}

/// What the provider reported for a send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Whether the provider accepted the message.
    pub success: bool,
    /// Provider-side message id, when accepted.
    pub message_id: Option<String>,
    /// Reason for a non-success receipt.
    pub error: Option<String>,
}

impl SendReceipt {
    /// Accepted receipt.
    #[must_use]
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    /// Rejected receipt.
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// External delivery mechanism (SMTP relay, transactional mail API, ...).
///
/// The `send` call is the only side effect a delivery attempt has. A crash between a
/// successful send and the status update re-sends on the next tick, so providers should
/// deduplicate where they can.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use outbound_queue::core::{DeliveryProvider, OutboundMessage, ProviderError, SendReceipt};
/// use outbound_queue::util::{OwnerId, ProviderId};
///
/// struct LogOnly;
///
/// #[async_trait]
/// impl DeliveryProvider for LogOnly {
///     async fn default_provider(&self, _owner: OwnerId) -> Result<ProviderId, ProviderError> {
///         Ok(ProviderId::nil())
///     }
///
///     async fn send(&self, _p: ProviderId, msg: &OutboundMessage) -> Result<SendReceipt, ProviderError> {
///         tracing::info!(subject = %msg.subject, "pretend send");
///         Ok(SendReceipt::accepted("log-only"))
///     }
/// }
/// ```
#[async_trait]
pub trait DeliveryProvider: Send + Sync + 'static {
    /// Provider to use for an owner's tasks that do not name one.
    ///
    /// # Errors
    /// [`ProviderError::NotConfigured`] when the owner has no usable default.
    async fn default_provider(&self, owner_id: OwnerId) -> Result<ProviderId, ProviderError>;

    /// Deliver one message through `provider_id`.
    ///
    /// # Errors
    /// Any [`ProviderError`]; the attempt is counted and retried per policy.
    async fn send(
        &self,
        provider_id: ProviderId,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, ProviderError>;
}
