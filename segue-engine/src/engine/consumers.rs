//! Decoded-buffer fan-out
//!
//! Every chunk from the current pipeline is handed to each registered
//! consumer on the engine task. Consumers must return quickly; anything slow
//! belongs on their own thread or task.

use crate::audio::types::AudioChunk;
use segue_common::events::PipelineId;
use std::sync::Arc;

/// Listener for decoded audio
pub trait BufferConsumer: Send + Sync {
    fn consume_buffer(&self, chunk: Arc<AudioChunk>, pipeline_id: PipelineId);
}

/// Consumer set keyed by `Arc` identity
#[derive(Default)]
pub struct BufferConsumers {
    consumers: Vec<Arc<dyn BufferConsumer>>,
}

fn same_consumer(a: &Arc<dyn BufferConsumer>, b: &Arc<dyn BufferConsumer>) -> bool {
    // Data pointers only
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl BufferConsumers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Returns false if it was already registered.
    pub fn add(&mut self, consumer: Arc<dyn BufferConsumer>) -> bool {
        if self.contains(&consumer) {
            return false;
        }
        self.consumers.push(consumer);
        true
    }

    /// Unregister a consumer. Returns false if it was not registered.
    pub fn remove(&mut self, consumer: &Arc<dyn BufferConsumer>) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|c| !same_consumer(c, consumer));
        self.consumers.len() != before
    }

    pub fn contains(&self, consumer: &Arc<dyn BufferConsumer>) -> bool {
        self.consumers.iter().any(|c| same_consumer(c, consumer))
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn deliver(&self, chunk: &Arc<AudioChunk>, pipeline_id: PipelineId) {
        for consumer in &self.consumers {
            consumer.consume_buffer(Arc::clone(chunk), pipeline_id);
        }
    }
}
