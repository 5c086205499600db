//! Task record model, lifecycle states and enqueue validation.
//!
//! A [`TaskRecord`] is the durable unit of outbound work. Producers hand the queue a
//! [`NewTask`]; validation and status derivation happen in [`NewTask::into_record`]
//! before anything reaches a store.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::core::error::QueueError;
use crate::util::serde::{OwnerId, ProviderId, TaskId};

/// Lifecycle status of a task.
///
/// ```text
/// Pending   -> Sending | Cancelled
/// Scheduled -> Sending | Cancelled
/// Sending   -> Sent | Failed
/// Failed    -> Scheduled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Eligible for dispatch now.
    Pending,
    /// Eligible once `scheduled_at` has passed.
    Scheduled,
    /// Claimed by a worker.
    Sending,
    /// Delivered.
    Sent,
    /// Last attempt failed.
    Failed,
    /// Withdrawn before dispatch.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Scheduled,
        Self::Sending,
        Self::Sent,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses the retention sweep may delete.
    pub const RETENTION: [Self; 3] = [Self::Sent, Self::Failed, Self::Cancelled];

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Scheduled, Self::Sending | Self::Cancelled)
                | (Self::Sending, Self::Sent | Self::Failed)
                | (Self::Failed, Self::Scheduled)
        )
    }

    /// Statuses from which `self` can be reached in one step.
    #[must_use]
    pub const fn predecessors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[],
            Self::Scheduled => &[Self::Failed],
            Self::Sending | Self::Cancelled => &[Self::Pending, Self::Scheduled],
            Self::Sent | Self::Failed => &[Self::Sending],
        }
    }

    /// Whether the retention sweep may delete records in this status.
    #[must_use]
    pub const fn is_retention_eligible(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| QueueError::Validation(format!("unknown task status `{s}`")))
    }
}

/// Primary, carbon-copy and blind-carbon-copy address sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    /// Primary recipients. Must be non-empty.
    pub to: BTreeSet<String>,
    /// Carbon-copy recipients.
    #[serde(default)]
    pub cc: BTreeSet<String>,
    /// Blind-carbon-copy recipients.
    #[serde(default)]
    pub bcc: BTreeSet<String>,
}

impl Recipients {
    /// Recipients with only primary addresses.
    pub fn to<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            to: collect_addresses(addresses),
            ..Self::default()
        }
    }

    fn all(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }
}

fn collect_addresses<I, A>(addresses: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = A>,
    A: Into<String>,
{
    addresses
        .into_iter()
        .map(|a| a.into().trim().to_owned())
        .collect()
}

/// Durable record of one deliverable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier, immutable.
    pub id: TaskId,
    /// Owning tenant.
    pub owner_id: OwnerId,
    /// Originating form, if any.
    pub form_id: Option<Uuid>,
    /// Originating submission, if any.
    pub submission_id: Option<Uuid>,
    /// Explicit provider; otherwise the owner's default is resolved at send time.
    pub provider_id: Option<ProviderId>,
    /// Template the bodies were rendered from, if any.
    pub template_id: Option<Uuid>,
    /// Addresses.
    pub recipients: Recipients,
    /// Subject line.
    pub subject: String,
    /// Rich body.
    pub html_body: String,
    /// Plain body.
    pub text_body: String,
    /// Personalization variables.
    pub variables: Map<String, Value>,
    /// Not eligible for dispatch before this instant.
    pub scheduled_at: DateTime<Utc>,
    /// Set iff `status == Sent`.
    pub sent_at: Option<DateTime<Utc>>,
    /// Higher dispatches first.
    pub priority: i32,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Error text of the last failed attempt.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Whether the dispatcher may select this task at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Scheduled => self.scheduled_at <= now,
            _ => false,
        }
    }

    /// Move along a lifecycle edge, keeping `sent_at` and `updated_at` consistent.
    ///
    /// # Errors
    /// Returns [`QueueError::InvalidState`] when `next` is not reachable from the
    /// current status.
    pub fn transition(
        &mut self,
        next: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidState {
                id: self.id,
                status: self.status,
                operation: "transition",
            });
        }
        self.status = next;
        self.last_error = error.map(str::to_owned);
        self.sent_at = (next == TaskStatus::Sent).then_some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Reply-to address carried in the `reply_to` variable, when present.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.variables
            .get("reply_to")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Boolean flag from the variable map, falling back to `default`.
    #[must_use]
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.variables
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

/// Enqueue request before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    /// Owning tenant.
    pub owner_id: OwnerId,
    /// Originating form.
    #[serde(default)]
    pub form_id: Option<Uuid>,
    /// Originating submission.
    #[serde(default)]
    pub submission_id: Option<Uuid>,
    /// Explicit provider.
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    /// Template reference.
    #[serde(default)]
    pub template_id: Option<Uuid>,
    /// Addresses.
    pub recipients: Recipients,
    /// Subject line.
    pub subject: String,
    /// Rich body.
    #[serde(default)]
    pub html_body: String,
    /// Plain body.
    #[serde(default)]
    pub text_body: String,
    /// Personalization variables.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Defaults to the enqueue time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Higher dispatches first.
    #[serde(default)]
    pub priority: i32,
    /// Derived from `scheduled_at` when absent.
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl NewTask {
    /// Minimal task: owner, primary recipients and subject.
    pub fn new<I, A>(owner_id: OwnerId, to: I, subject: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            owner_id,
            form_id: None,
            submission_id: None,
            provider_id: None,
            template_id: None,
            recipients: Recipients::to(to),
            subject: subject.into(),
            html_body: String::new(),
            text_body: String::new(),
            variables: Map::new(),
            scheduled_at: None,
            priority: 0,
            status: None,
        }
    }

    /// Add carbon-copy recipients.
    #[must_use]
    pub fn with_cc<I, A>(mut self, cc: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.recipients.cc.extend(collect_addresses(cc));
        self
    }

    /// Add blind-carbon-copy recipients.
    #[must_use]
    pub fn with_bcc<I, A>(mut self, bcc: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.recipients.bcc.extend(collect_addresses(bcc));
        self
    }

    /// Set the rich body.
    #[must_use]
    pub fn with_html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = body.into();
        self
    }

    /// Set the plain body.
    #[must_use]
    pub fn with_text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = body.into();
        self
    }

    /// Insert one personalization variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Delay eligibility until `at`.
    #[must_use]
    pub const fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Set the priority from a raw integer or a [`Priority`](crate::util::Priority).
    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<i32>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Force the initial status (`Pending` or `Scheduled` only).
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Pin a provider instead of the owner's default.
    #[must_use]
    pub const fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    /// Record the template the bodies came from.
    #[must_use]
    pub const fn with_template(mut self, template_id: Uuid) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// Record the originating form and submission.
    #[must_use]
    pub const fn with_origin(mut self, form_id: Uuid, submission_id: Option<Uuid>) -> Self {
        self.form_id = Some(form_id);
        self.submission_id = submission_id;
        self
    }

    /// Check the request without persisting anything.
    ///
    /// # Errors
    /// Returns [`QueueError::Validation`] describing the first problem found.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), QueueError> {
        if self.recipients.to.is_empty() {
            return Err(QueueError::Validation(
                "at least one primary recipient is required".into(),
            ));
        }
        if let Some(bad) = self.recipients.all().find(|a| !a.validate_email()) {
            return Err(QueueError::Validation(format!(
                "invalid recipient address `{bad}`"
            )));
        }
        if self.html_body.trim().is_empty() && self.text_body.trim().is_empty() {
            return Err(QueueError::Validation(
                "html_body or text_body must be non-empty".into(),
            ));
        }
        match self.status {
            None | Some(TaskStatus::Scheduled) => {}
            Some(TaskStatus::Pending) => {
                if self.scheduled_at.is_some_and(|at| at > now) {
                    return Err(QueueError::Validation(
                        "pending tasks cannot be scheduled in the future".into(),
                    ));
                }
            }
            Some(other) => {
                return Err(QueueError::Validation(format!(
                    "initial status must be pending or scheduled, got {other}"
                )));
            }
        }
        Ok(())
    }

    /// Validate and materialize a record with a fresh id.
    ///
    /// Without an explicit status the task is `Scheduled` when `scheduled_at` is in
    /// the future and `Pending` otherwise.
    ///
    /// # Errors
    /// Propagates [`NewTask::validate`] failures.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<TaskRecord, QueueError> {
        self.validate(now)?;
        let scheduled_at = self.scheduled_at.unwrap_or(now);
        let status = self.status.unwrap_or(if scheduled_at > now {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        });
        Ok(TaskRecord {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            form_id: self.form_id,
            submission_id: self.submission_id,
            provider_id: self.provider_id,
            template_id: self.template_id,
            recipients: self.recipients,
            subject: self.subject,
            html_body: self.html_body,
            text_body: self.text_body,
            variables: self.variables,
            scheduled_at,
            sent_at: None,
            priority: self.priority,
            status,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Criteria for listing tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Restrict to one owner.
    pub owner_id: Option<OwnerId>,
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    /// Filter by owner.
    #[must_use]
    pub const fn owner(owner_id: OwnerId) -> Self {
        Self {
            owner_id: Some(owner_id),
            status: None,
        }
    }

    /// Additionally filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.owner_id.is_none_or(|o| o == record.owner_id)
            && self.status.is_none_or(|s| s == record.status)
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending tasks.
    pub pending: u64,
    /// Scheduled tasks.
    pub scheduled: u64,
    /// In-flight tasks.
    pub sending: u64,
    /// Delivered tasks.
    pub sent: u64,
    /// Failed tasks (awaiting manual retry or exhausted).
    pub failed: u64,
    /// Cancelled tasks.
    pub cancelled: u64,
    /// Sum of all of the above.
    pub total: u64,
}

impl QueueStats {
    /// Add `count` tasks in `status`.
    pub fn add(&mut self, status: TaskStatus, count: u64) {
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Scheduled => &mut self.scheduled,
            TaskStatus::Sending => &mut self.sending,
            TaskStatus::Sent => &mut self.sent,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += count;
        self.total += count;
    }
}

/// Aggregate outcome of one dispatch tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Tasks selected for the batch.
    pub processed: usize,
    /// Tasks delivered.
    pub sent: usize,
    /// Tasks whose attempt failed or timed out.
    pub failed: usize,
    /// Tasks another dispatcher claimed first.
    pub skipped: usize,
    /// One entry per failure, prefixed with the task id.
    pub errors: Vec<String>,
}
