use serde::{Deserialize, Serialize};

/// Outcome of one sync run over a knowledge base.
///
/// `synced_count + error_count` equals `total_pending`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub knowledge_base_id: String,
    /// Points that were unsynced when the run started.
    pub total_pending: usize,
    pub synced_count: usize,
    pub error_count: usize,
    /// Human-readable failure descriptions, one per failed batch or point.
    pub errors: Vec<String>,
    /// Estimated USD cost of the embedding calls that succeeded.
    pub cost: Option<f64>,
    pub batches: usize,
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn new(knowledge_base_id: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    pub fn record_failure(&mut self, count: usize, detail: impl Into<String>) {
        self.error_count += count;
        self.errors.push(detail.into());
    }
}

/// Token count and cost estimate for a set of texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub items: usize,
    pub total_tokens: usize,
    /// USD, rounded to six decimals.
    pub estimated_cost: f64,
    /// Items that exceed the per-item token ceiling.
    pub over_limit: usize,
}

/// Static description of the configured embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model: String,
    pub dimension: u32,
    pub max_tokens: usize,
    pub max_batch_items: usize,
    pub cost_per_million_tokens: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failure_accumulates() {
        let mut result = SyncResult::new("kb-1");
        assert!(result.is_clean());

        result.total_pending = 121;
        result.synced_count = 70;
        result.record_failure(50, "batch 2: embedding failed");
        result.record_failure(1, "point p1: empty content");

        assert_eq!(result.error_count, 51);
        assert_eq!(result.errors.len(), 2);
        assert!(!result.is_clean());
        assert_eq!(result.synced_count + result.error_count, result.total_pending);
    }
}
