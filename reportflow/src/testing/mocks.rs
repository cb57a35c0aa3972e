//! Scripted content generators for tests.

use crate::errors::PassError;
use crate::generator::{ContentGenerator, GenerationRequest, GenerationResponse, Usage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with a transport error.
    Transport(String),
    /// Fail with a timeout.
    Timeout,
}

/// A generator that answers from a script keyed by request label.
///
/// Labels are `"{stage}"` for whole-job stages and `"{stage}:{document}"`
/// for fan-out passes. Lookup tries one-shot replies before persistent ones,
/// and the exact label before the stage prefix, so a single persistent reply
/// for `"financial_extraction"` answers every document.
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<String, String>>,
    queued: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<GenerationRequest>>,
    usage: Usage,
    delay: Option<Duration>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            usage: Usage::new(100, 50),
            delay: None,
        }
    }
}

impl ScriptedGenerator {
    /// Creates a generator with no script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the usage reported by every successful call.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the persistent reply for a label.
    pub fn reply(&self, label: impl Into<String>, text: impl Into<String>) {
        self.replies.lock().insert(label.into(), text.into());
    }

    /// Queues a one-shot reply for a label.
    pub fn enqueue(&self, label: impl Into<String>, reply: ScriptedReply) {
        self.queued
            .lock()
            .entry(label.into())
            .or_default()
            .push_back(reply);
    }

    /// Queues `times` transport failures for a label.
    pub fn fail_times(&self, label: impl Into<String>, times: usize) {
        let label = label.into();
        for attempt in 1..=times {
            self.enqueue(
                label.clone(),
                ScriptedReply::Transport(format!("scripted failure {attempt}")),
            );
        }
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of requests whose label is `stage` or starts with
    /// `"{stage}:"`.
    #[must_use]
    pub fn calls_for(&self, stage: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| stage_prefix(&c.label) == stage)
            .count()
    }

    fn next_reply(&self, label: &str) -> Option<ScriptedReply> {
        let prefix = stage_prefix(label);
        {
            let mut queued = self.queued.lock();
            for key in [label, prefix] {
                if let Some(reply) = queued.get_mut(key).and_then(VecDeque::pop_front) {
                    return Some(reply);
                }
            }
        }
        let replies = self.replies.lock();
        replies
            .get(label)
            .or_else(|| replies.get(prefix))
            .cloned()
            .map(ScriptedReply::Text)
    }
}

fn stage_prefix(label: &str) -> &str {
    label.split_once(':').map_or(label, |(stage, _)| stage)
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, PassError> {
        let label = request.label.clone();
        self.calls.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply(&label) {
            Some(ScriptedReply::Text(text)) => Ok(GenerationResponse::new(text, self.usage)),
            Some(ScriptedReply::Transport(message)) => Err(PassError::Transport(message)),
            Some(ScriptedReply::Timeout) => Err(PassError::Timeout { after_ms: 0 }),
            None => Err(PassError::Transport(format!("no scripted reply for '{label}'"))),
        }
    }
}
