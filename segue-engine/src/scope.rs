//! Scope buffer
//!
//! Rolling window of the most recent decoded chunks from the current
//! pipeline, answering "give me the last N samples" for visualisations.
//!
//! Chunks from any other pipeline are rejected on arrival, and the window is
//! emptied whenever the current pipeline changes or a seek lands, so the
//! buffer never mixes audio from two tracks or two positions.

use crate::audio::types::AudioChunk;
use segue_common::events::PipelineId;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of chunks retained
pub const DEFAULT_SCOPE_CHUNKS: usize = 16;

pub struct ScopeBuffer {
    chunks: VecDeque<Arc<AudioChunk>>,
    max_chunks: usize,
    /// Pipeline whose chunks are accepted
    pipeline_id: Option<PipelineId>,
}

impl ScopeBuffer {
    pub fn new(max_chunks: usize) -> Self {
        let max_chunks = max_chunks.max(1);
        Self {
            chunks: VecDeque::with_capacity(max_chunks),
            max_chunks,
            pipeline_id: None,
        }
    }

    /// Follow a new current pipeline (or none). Clears the window.
    pub fn set_pipeline(&mut self, pipeline_id: Option<PipelineId>) {
        if self.pipeline_id != pipeline_id {
            self.pipeline_id = pipeline_id;
            self.chunks.clear();
        }
    }

    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline_id
    }

    /// Offer a chunk. Returns false when it came from another pipeline.
    pub fn push(&mut self, chunk: Arc<AudioChunk>, pipeline_id: PipelineId) -> bool {
        if self.pipeline_id != Some(pipeline_id) {
            return false;
        }
        if self.chunks.len() == self.max_chunks {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
        true
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Up to `chunk_length` of the most recent samples, oldest first.
    /// Returns fewer when fewer are held.
    pub fn scope(&self, chunk_length: usize) -> Vec<f32> {
        let mut needed = chunk_length;
        let mut start_chunk = self.chunks.len();
        let mut skip_in_first = 0;

        // Walk back from the newest chunk until enough samples are covered
        while needed > 0 && start_chunk > 0 {
            start_chunk -= 1;
            let len = self.chunks[start_chunk].samples.len();
            if len >= needed {
                skip_in_first = len - needed;
                needed = 0;
            } else {
                needed -= len;
            }
        }

        let mut out = Vec::with_capacity(chunk_length - needed);
        for (i, chunk) in self.chunks.iter().enumerate().skip(start_chunk) {
            let samples = if i == start_chunk {
                &chunk.samples[skip_in_first..]
            } else {
                &chunk.samples[..]
            };
            out.extend_from_slice(samples);
        }
        out
    }
}

impl Default for ScopeBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE_CHUNKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: &[f32]) -> Arc<AudioChunk> {
        Arc::new(AudioChunk::new(samples.to_vec(), 44_100, 2, 0))
    }

    #[test]
    fn test_rejects_other_pipelines() {
        let mut scope = ScopeBuffer::new(4);
        assert!(!scope.push(chunk(&[1.0]), PipelineId(1)));

        scope.set_pipeline(Some(PipelineId(1)));
        assert!(scope.push(chunk(&[1.0]), PipelineId(1)));
        assert!(!scope.push(chunk(&[2.0]), PipelineId(2)));
        assert_eq!(scope.scope(10), vec![1.0]);
    }

    #[test]
    fn test_latest_samples_oldest_first() {
        let mut scope = ScopeBuffer::new(4);
        scope.set_pipeline(Some(PipelineId(1)));
        scope.push(chunk(&[1.0, 2.0, 3.0]), PipelineId(1));
        scope.push(chunk(&[4.0, 5.0]), PipelineId(1));
        scope.push(chunk(&[6.0, 7.0, 8.0]), PipelineId(1));

        assert_eq!(scope.scope(4), vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!(scope.scope(3), vec![6.0, 7.0, 8.0]);
        assert_eq!(scope.scope(2), vec![7.0, 8.0]);
        assert_eq!(scope.scope(0), Vec::<f32>::new());
    }

    #[test]
    fn test_short_history_is_not_padded() {
        let mut scope = ScopeBuffer::new(4);
        scope.set_pipeline(Some(PipelineId(1)));
        scope.push(chunk(&[1.0, 2.0]), PipelineId(1));
        assert_eq!(scope.scope(100), vec![1.0, 2.0]);
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut scope = ScopeBuffer::new(2);
        scope.set_pipeline(Some(PipelineId(1)));
        scope.push(chunk(&[1.0]), PipelineId(1));
        scope.push(chunk(&[2.0]), PipelineId(1));
        scope.push(chunk(&[3.0]), PipelineId(1));
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.scope(10), vec![2.0, 3.0]);
    }

    #[test]
    fn test_pipeline_change_clears() {
        let mut scope = ScopeBuffer::new(4);
        scope.set_pipeline(Some(PipelineId(1)));
        scope.push(chunk(&[1.0]), PipelineId(1));

        scope.set_pipeline(Some(PipelineId(1)));
        assert_eq!(scope.len(), 1);

        scope.set_pipeline(Some(PipelineId(2)));
        assert!(scope.is_empty());
        assert_eq!(scope.pipeline_id(), Some(PipelineId(2)));
    }
}
