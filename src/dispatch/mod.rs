//! Sequential, rate-limited bulk send loop.
//!
//! One generic loop serves every channel. The channel supplies a
//! [`SendAction`] and optionally a [`BackoffPolicy`]; the loop renders the
//! message, emits progress, records one [`DispatchResult`] per target and
//! never lets a single failed send stop the batch.
//!
//! There is no deduplication and no memory of earlier runs: running the same
//! job twice sends everything twice.

pub mod progress;

pub use progress::{FnSink, LogSink, NullSink, ProgressEvent, ProgressSink, ProgressStatus};

use crate::template::{MessageTemplate, RenderedMessage, DEFAULT_NAME_FALLBACK};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const MIN_DELAY_MS: u64 = 100;
pub const MAX_DELAY_MS: u64 = 10_000;

/// Keeps a user-entered delay inside the supported range.
pub fn clamp_delay(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_DELAY_MS, MAX_DELAY_MS))
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatch requires at least one target")]
    NoTargets,
}

/// Anything a message can be dispatched to.
pub trait DispatchTarget: Send + Sync {
    /// Identifier shown in progress events (address or number).
    fn label(&self) -> &str;

    /// Name used for `{{name}}` personalization.
    fn display_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The channel refused this target (unregistered number, bad address).
    Rejected,
    /// The transport itself failed.
    Transport,
}

/// Why a single send failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SendFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SendFailure {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }
}

/// Performs one transport-level send.
#[async_trait]
pub trait SendAction<T: DispatchTarget>: Send + Sync {
    async fn send_one(&self, target: &T, message: &RenderedMessage) -> Result<(), SendFailure>;
}

#[async_trait]
impl<T, A> SendAction<T> for &A
where
    T: DispatchTarget,
    A: SendAction<T> + ?Sized,
{
    async fn send_one(&self, target: &T, message: &RenderedMessage) -> Result<(), SendFailure> {
        (**self).send_one(target, message).await
    }
}

/// Pause applied after a failed item. `None` falls back to the job delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub rejected: Option<Duration>,
    pub transport: Option<Duration>,
}

impl BackoffPolicy {
    fn pause_after(&self, outcome: Option<FailureKind>, delay: Duration) -> Duration {
        match outcome {
            None => delay,
            Some(FailureKind::Rejected) => self.rejected.unwrap_or(delay),
            Some(FailureKind::Transport) => self.transport.unwrap_or(delay),
        }
    }
}

/// One run over one target list.
#[derive(Debug)]
pub struct DispatchJob<T> {
    pub targets: Vec<T>,
    pub template: MessageTemplate,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    /// Not attempted because the job was cancelled.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult<T> {
    pub target: T,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport<T> {
    pub results: Vec<DispatchResult<T>>,
    pub summary: DispatchSummary,
}

pub struct Dispatcher<A, P> {
    action: A,
    sink: P,
    backoff: BackoffPolicy,
    name_fallback: String,
    cancel: Option<CancellationToken>,
}

impl<A, P> Dispatcher<A, P>
where
    P: ProgressSink,
{
    pub fn new(action: A, sink: P) -> Self {
        Self {
            action,
            sink,
            backoff: BackoffPolicy::default(),
            name_fallback: DEFAULT_NAME_FALLBACK.to_string(),
            cancel: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_name_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.name_fallback = fallback.into();
        self
    }

    /// Checked before each item; a cancelled job skips whatever is left.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => debug!("Pause cut short by cancellation"),
                    _ = tokio::time::sleep(duration) => {}
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }

    fn emit(&self, current: usize, total: usize, target: &str, status: ProgressStatus, error: Option<String>) {
        self.sink.emit(&ProgressEvent {
            current,
            total,
            target: target.to_string(),
            status,
            error,
        });
    }

    /// Sends to every target in order and returns one result per target.
    pub async fn run<T>(&self, job: DispatchJob<T>) -> Result<DispatchReport<T>, DispatchError>
    where
        T: DispatchTarget,
        A: SendAction<T>,
    {
        let DispatchJob {
            targets,
            template,
            delay,
        } = job;

        if targets.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        let total = targets.len();
        let mut results = Vec::with_capacity(total);
        let mut summary = DispatchSummary::default();

        info!("Dispatching to {} targets", total);

        for (i, target) in targets.into_iter().enumerate() {
            let current = i + 1;

            if self.is_cancelled() {
                summary.skipped += 1;
                results.push(DispatchResult {
                    target,
                    status: DeliveryStatus::Skipped,
                    error: None,
                    finished_at: Utc::now(),
                });
                continue;
            }

            self.emit(current, total, target.label(), ProgressStatus::Sending, None);

            let outcome = match template.render(target.display_name(), &self.name_fallback) {
                Ok(message) => self.action.send_one(&target, &message).await,
                Err(e) => Err(SendFailure::rejected(e.to_string())),
            };

            let failure_kind = match outcome {
                Ok(()) => {
                    summary.sent += 1;
                    self.emit(current, total, target.label(), ProgressStatus::Sent, None);
                    results.push(DispatchResult {
                        target,
                        status: DeliveryStatus::Sent,
                        error: None,
                        finished_at: Utc::now(),
                    });
                    None
                }
                Err(failure) => {
                    summary.failed += 1;
                    self.emit(
                        current,
                        total,
                        target.label(),
                        ProgressStatus::Failed,
                        Some(failure.message.clone()),
                    );
                    results.push(DispatchResult {
                        target,
                        status: DeliveryStatus::Failed,
                        error: Some(failure.message),
                        finished_at: Utc::now(),
                    });
                    Some(failure.kind)
                }
            };

            if current < total {
                self.pause(self.backoff.pause_after(failure_kind, delay)).await;
            }
        }

        info!(
            "Dispatch finished. Sent: {}, Failed: {}, Skipped: {}",
            summary.sent, summary.failed, summary.skipped
        );

        Ok(DispatchReport { results, summary })
    }
}
