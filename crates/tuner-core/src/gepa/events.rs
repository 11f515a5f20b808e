//! Progress events streamed to the caller while a run executes

use super::{MetricScores, PromptCandidate};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    SampleOutput,
    EvaluationOutput,
    Iteration,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::SampleOutput => "sample_output",
            EventKind::EvaluationOutput => "evaluation_output",
            EventKind::Iteration => "iteration",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub iteration: usize,
    pub accepted: bool,
    pub collection_size: usize,
    pub best_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<Vec<PromptCandidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, iteration: usize, collection_size: usize, best_score: f64) -> Self {
        Self {
            kind,
            iteration,
            accepted: false,
            collection_size,
            best_score,
            run_id: None,
            sample_id: None,
            content: None,
            candidate_prompt: None,
            batch_score: None,
            metrics: None,
            final_prompt: None,
            collection: None,
            message: None,
            error: None,
        }
    }

    /// Fatal error event
    pub fn failure(run_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            error: Some(error.into()),
            ..Self::new(EventKind::Error, 0, 0, 0.0)
        }
    }

    pub fn accepted(mut self, accepted: bool) -> Self {
        self.accepted = accepted;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receives progress events. Emitting never fails from the caller's view.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Discards every event
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events over a tokio channel; a closed receiver is ignored
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Progress receiver dropped; event discarded");
        }
    }
}

/// Event sink plus the tags every nested event carries
#[derive(Clone, Copy)]
pub struct Progress<'a> {
    sink: &'a dyn EventSink,
    pub iteration: usize,
    pub collection_size: usize,
    pub best_score: f64,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a dyn EventSink, iteration: usize, collection_size: usize, best_score: f64) -> Self {
        Self {
            sink,
            iteration,
            collection_size,
            best_score,
        }
    }

    pub fn silent() -> Progress<'static> {
        Progress::new(&NullSink, 0, 0, 0.0)
    }

    pub fn event(&self, kind: EventKind) -> ProgressEvent {
        ProgressEvent::new(kind, self.iteration, self.collection_size, self.best_score)
    }

    pub async fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event).await;
    }

    pub async fn sample_output(&self, sample_id: &str, content: impl Into<String>) {
        let mut event = self.event(EventKind::SampleOutput);
        event.sample_id = Some(sample_id.to_string());
        event.content = Some(content.into());
        self.emit(event).await;
    }

    pub async fn evaluation_output(&self, sample_id: &str, content: impl Into<String>) {
        let mut event = self.event(EventKind::EvaluationOutput);
        event.sample_id = Some(sample_id.to_string());
        event.content = Some(content.into());
        self.emit(event).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every event for inspection
    #[derive(Default)]
    pub struct CollectingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl CollectingSink {
        pub fn events(&self) -> Vec<ProgressEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn kinds(&self) -> Vec<EventKind> {
            self.events().into_iter().map(|e| e.kind).collect()
        }
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
