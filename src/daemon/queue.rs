//! FIFO of queued speak requests drained by a single worker.
//!
//! Items stay tracked until the worker finishes them, so `queue_size`
//! counts the item currently playing plus everything waiting behind it.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::protocol::{QueueItemView, QueueStatusResult, preview};
use crate::pipeline::{DEFAULT_VOICE_KEY, SpeakRequest};

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: String,
    pub request: SpeakRequest,
    pub enqueued_at: DateTime<Local>,
}

impl QueueItem {
    pub fn new(request: SpeakRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            enqueued_at: Local::now(),
        }
    }

    /// `default_provider` fills in a request that named none.
    pub fn view(&self, default_provider: &str) -> QueueItemView {
        QueueItemView {
            id: self.id.clone(),
            text: preview(&self.request.text),
            timestamp: self.enqueued_at.to_rfc3339(),
            provider: self
                .request
                .provider
                .clone()
                .unwrap_or_else(|| default_provider.to_string()),
            voice: self
                .request
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_VOICE_KEY.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// Front item has been handed to the worker.
    busy: bool,
}

#[derive(Debug, Default)]
pub struct SpeechQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track and enqueue `item`; returns its 1-based position.
    pub fn push(&self, item: QueueItem) -> usize {
        let position = {
            let mut state = self.state.lock();
            state.items.push_back(item);
            state.items.len()
        };
        self.ready.notify_one();
        position
    }

    /// Wait for the next item and mark it current.
    pub async fn next(&self) -> QueueItem {
        loop {
            let notified = self.ready.notified();
            {
                let mut state = self.state.lock();
                if !state.busy
                    && let Some(item) = state.items.front().cloned()
                {
                    state.busy = true;
                    return item;
                }
            }
            notified.await;
        }
    }

    /// Drop the current item from tracking.
    pub fn finish(&self, id: &str) {
        let mut state = self.state.lock();
        if state.busy && state.items.front().is_some_and(|i| i.id == id) {
            state.items.pop_front();
            state.busy = false;
        }
        let more = !state.items.is_empty();
        drop(state);
        if more {
            self.ready.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self, default_provider: &str) -> QueueStatusResult {
        let state = self.state.lock();
        let current = state
            .busy
            .then(|| state.items.front())
            .flatten()
            .map(|i| i.view(default_provider));
        let skip = usize::from(state.busy);
        QueueStatusResult {
            queue_size: state.items.len(),
            current,
            waiting: state
                .items
                .iter()
                .skip(skip)
                .map(|i| i.view(default_provider))
                .collect(),
        }
    }
}
