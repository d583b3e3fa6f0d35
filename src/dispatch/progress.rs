use log::{info, warn};
use serde::Serialize;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc as tokio_mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Sending,
    Sent,
    Failed,
}

/// Per-item notification. `current` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub target: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Receives progress events synchronously, in per-item order.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

impl<S: ProgressSink + ?Sized> ProgressSink for &S {
    fn emit(&self, event: &ProgressEvent) {
        (**self).emit(event);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Box<S> {
    fn emit(&self, event: &ProgressEvent) {
        (**self).emit(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: &ProgressEvent) {
        (self.0)(event);
    }
}

impl ProgressSink for std_mpsc::Sender<ProgressEvent> {
    fn emit(&self, event: &ProgressEvent) {
        if let Err(e) = self.send(event.clone()) {
            warn!("Progress receiver dropped: {}", e);
        }
    }
}

impl ProgressSink for tokio_mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: &ProgressEvent) {
        if let Err(e) = self.send(event.clone()) {
            warn!("Progress receiver dropped: {}", e);
        }
    }
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &ProgressEvent) {
        match (&event.status, &event.error) {
            (ProgressStatus::Failed, Some(err)) => warn!(
                "[{}/{}] failed {}: {}",
                event.current, event.total, event.target, err
            ),
            (status, _) => info!(
                "[{}/{}] {:?} {}",
                event.current, event.total, status, event.target
            ),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &ProgressEvent) {}
}
