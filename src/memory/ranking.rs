//! Hybrid ranking for retrieved memories.
//!
//! Score = alpha * cosine_similarity + beta * normalized_importance
//!       + gamma * exp(-age / half_life). Importance is normalized by the
//! maximum importance among the candidates so beta's contribution stays in
//! [0, 1]. Ties break by most-recent `created_at`, then by id, giving a
//! total deterministic order.

use chrono::{DateTime, Utc};

use crate::core::config::RetrievalConfig;
use crate::memory::record::MemoryRecord;

/// Ranked memory with its score breakdown.
#[derive(Clone, Debug)]
pub struct RankedMemory {
    /// Final combined score.
    pub score: f64,
    /// Cosine similarity component.
    pub similarity: f64,
    /// Normalized importance component.
    pub importance_score: f64,
    /// Recency decay component.
    pub recency_score: f64,
    /// The memory record.
    pub record: MemoryRecord,
}

/// Cosine similarity between two vectors, 0.0 when either is degenerate.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank non-expired candidates against a query embedding.
///
/// Expired records must already have been filtered out by the caller; this
/// function is pure given its inputs and never consults the clock.
#[must_use]
pub fn rank_records(
    candidates: Vec<MemoryRecord>,
    query_embedding: &[f32],
    config: &RetrievalConfig,
    now: DateTime<Utc>,
) -> Vec<RankedMemory> {
    let half_life = config.recency_half_life_seconds.max(1) as f64;
    let max_importance = candidates
        .iter()
        .map(|record| record.importance)
        .fold(0.0_f64, f64::max);

    let mut ranked = Vec::with_capacity(candidates.len());
    for record in candidates {
        let similarity = cosine_similarity(&record.embedding, query_embedding);
        let importance_score = if max_importance > 0.0 {
            record.importance / max_importance
        } else {
            0.0
        };
        let age_seconds = now
            .signed_duration_since(record.recency_anchor())
            .num_seconds()
            .max(0) as f64;
        let recency_score = (-age_seconds / half_life).exp();
        let score = config.alpha_similarity * similarity
            + config.beta_importance * importance_score
            + config.gamma_recency * recency_score;

        ranked.push(RankedMemory {
            score,
            similarity,
            importance_score,
            recency_score,
            record,
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{CompanionId, MemoryId};
    use chrono::Duration;

    fn record_at(
        embedding: Vec<f32>,
        importance: f64,
        created_at: DateTime<Utc>,
        last_accessed_at: Option<DateTime<Utc>>,
    ) -> MemoryRecord {
        MemoryRecord {
            id: MemoryId::new(),
            companion_id: CompanionId::new(),
            content: "fact".to_string(),
            embedding,
            importance,
            category: None,
            metadata: serde_json::Value::Null,
            access_count: 0,
            last_accessed_at,
            created_at,
            expires_at: None,
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let now = Utc::now();
        let query = vec![1.0_f32, 0.0];
        let records: Vec<MemoryRecord> = (0..8)
            .map(|i| {
                record_at(
                    vec![1.0, 0.1 * i as f32],
                    1.0,
                    now - Duration::hours(i),
                    None,
                )
            })
            .collect();

        let config = RetrievalConfig::default();
        let first = rank_records(records.clone(), &query, &config, now);
        let second = rank_records(records, &query, &config, now);
        let first_ids: Vec<_> = first.iter().map(|r| r.record.id).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.record.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_ties_break_by_created_then_id() {
        let now = Utc::now();
        let query = vec![1.0_f32, 0.0];
        let newer = record_at(vec![1.0, 0.0], 1.0, now - Duration::hours(1), None);
        let older = record_at(vec![1.0, 0.0], 1.0, now - Duration::hours(2), None);
        // Identical similarity and importance; recency anchors differ only by
        // creation time, which the gamma term already separates. Pin the
        // anchors to equalize recency and force the created_at tie-break.
        let anchor = now - Duration::minutes(30);
        let mut newer = newer;
        let mut older = older;
        newer.last_accessed_at = Some(anchor);
        older.last_accessed_at = Some(anchor);

        let config = RetrievalConfig::default();
        let ranked = rank_records(vec![older.clone(), newer.clone()], &query, &config, now);
        assert_eq!(ranked[0].record.id, newer.id);
        assert_eq!(ranked[1].record.id, older.id);
    }

    #[test]
    fn test_decay_monotonicity() {
        // Two memories with identical embeddings and importance: the more
        // recently accessed one never scores lower.
        let now = Utc::now();
        let query = vec![0.5_f32, 0.5];
        let recent = record_at(
            vec![0.5, 0.5],
            1.0,
            now - Duration::days(60),
            Some(now - Duration::hours(1)),
        );
        let stale = record_at(
            vec![0.5, 0.5],
            1.0,
            now - Duration::days(60),
            Some(now - Duration::days(30)),
        );

        let config = RetrievalConfig::default();
        let ranked = rank_records(vec![stale.clone(), recent.clone()], &query, &config, now);
        assert_eq!(ranked[0].record.id, recent.id);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_thirty_day_old_memory_ranks_below_recent_peers() {
        // Six equally-similar memories with importance 1.0; one accessed 30
        // days ago, the rest 1 hour ago. With a 7-day half-life the stale one
        // lands last.
        let now = Utc::now();
        let query = vec![1.0_f32, 1.0];
        let mut records: Vec<MemoryRecord> = (0..5)
            .map(|_| {
                record_at(
                    vec![1.0, 1.0],
                    1.0,
                    now - Duration::days(40),
                    Some(now - Duration::hours(1)),
                )
            })
            .collect();
        let stale = record_at(
            vec![1.0, 1.0],
            1.0,
            now - Duration::days(40),
            Some(now - Duration::days(30)),
        );
        records.push(stale.clone());

        let config = RetrievalConfig::default();
        let ranked = rank_records(records, &query, &config, now);
        assert_eq!(ranked.last().unwrap().record.id, stale.id);
    }

    #[test]
    fn test_importance_normalized_by_candidate_max() {
        let now = Utc::now();
        let query = vec![1.0_f32, 0.0];
        let heavy = record_at(vec![1.0, 0.0], 4.0, now, Some(now));
        let light = record_at(vec![1.0, 0.0], 2.0, now, Some(now));

        let config = RetrievalConfig::default();
        let ranked = rank_records(vec![light, heavy.clone()], &query, &config, now);
        assert_eq!(ranked[0].record.id, heavy.id);
        assert!((ranked[0].importance_score - 1.0).abs() < 1e-9);
        assert!((ranked[1].importance_score - 0.5).abs() < 1e-9);
    }
}
