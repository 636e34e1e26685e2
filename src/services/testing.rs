//! Test doubles shared by the service tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::embedding::EmbeddingProvider;
use crate::error::EmbeddingError;

/// Deterministic provider that fails on chosen (1-based) call numbers.
pub struct ScriptedEmbeddingProvider {
    dimension: usize,
    failing_calls: HashSet<usize>,
    calls: AtomicUsize,
    texts_seen: AtomicUsize,
}

impl ScriptedEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failing_calls: HashSet::new(),
            calls: AtomicUsize::new(0),
            texts_seen: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing_calls.extend(calls.iter().copied());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_seen(&self) -> usize {
        self.texts_seen.load(Ordering::SeqCst)
    }

    /// The vector this provider returns for `text`.
    pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % dimension] += f32::from(byte) / 255.0;
        }
        vector[0] += 1.0;
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbeddingProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(EmbeddingError::ProviderError(format!(
                "status 500: scripted failure on call {call}"
            )));
        }
        self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| Self::vector_for(t, self.dimension))
            .collect())
    }
}
