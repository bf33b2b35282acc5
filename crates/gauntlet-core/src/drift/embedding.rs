use super::{embedding_severity, Draft};
use crate::config::Settings;
use crate::embeddings::util::{centroid, cosine_similarity, pairwise_similarity_variance};
use crate::errors::EngineError;
use crate::model::{DriftChannel, EmbeddingRow, Severity};
use serde_json::json;

/// Embedding drift: cosine distance between the two centroid vectors, plus
/// the delta of within-side pairwise-similarity variance when both sides have
/// enough vectors. Requires embeddings from the same model on both sides;
/// when exactly one side has vectors (or models differ) the channel degrades
/// to a single `embeddings_unavailable` finding.
pub(super) fn detect(
    current: &[EmbeddingRow],
    baseline: &[EmbeddingRow],
    settings: &Settings,
) -> Result<Vec<Draft>, EngineError> {
    if current.is_empty() && baseline.is_empty() {
        return Ok(Vec::new());
    }
    if current.is_empty() || baseline.is_empty() {
        return Ok(vec![unavailable(current, baseline, "missing embeddings")]);
    }
    if current[0].model != baseline[0].model {
        return Ok(vec![unavailable(current, baseline, "model name mismatch")]);
    }

    let current_vectors: Vec<Vec<f32>> = current.iter().map(|e| e.vector.clone()).collect();
    let baseline_vectors: Vec<Vec<f32>> = baseline.iter().map(|e| e.vector.clone()).collect();

    let channel_err = |e: anyhow::Error| EngineError::DriftChannel {
        channel: DriftChannel::Embedding,
        message: e.to_string(),
    };
    let current_centroid = centroid(&current_vectors).map_err(channel_err)?;
    let baseline_centroid = centroid(&baseline_vectors).map_err(channel_err)?;
    let similarity = cosine_similarity(&current_centroid, &baseline_centroid)
        .map_err(|e| EngineError::DriftChannel {
            channel: DriftChannel::Embedding,
            message: e.to_string(),
        })?;
    let distance = 1.0 - similarity;

    let mut drafts = Vec::new();
    if let Some(severity) = embedding_severity(distance, settings.drift_thresholds.embedding) {
        drafts.push(Draft {
            metric: "centroid_cosine_distance".to_string(),
            value: distance,
            severity,
            confidence: Some(0.85),
            details: json!({
                "cosine_similarity": similarity,
                "current_embedding_count": current.len(),
                "baseline_embedding_count": baseline.len(),
                "model": current[0].model,
            }),
        });
    }

    if let (Some(var_current), Some(var_baseline)) = (
        pairwise_similarity_variance(&current_vectors),
        pairwise_similarity_variance(&baseline_vectors),
    ) {
        let delta = (var_current - var_baseline).abs();
        if let Some(severity) = embedding_severity(delta, settings.drift_thresholds.embedding) {
            drafts.push(Draft {
                metric: "pairwise_similarity_variance_delta".to_string(),
                value: delta,
                severity,
                confidence: Some(0.85),
                details: json!({
                    "current_variance": var_current,
                    "baseline_variance": var_baseline,
                }),
            });
        }
    }

    Ok(drafts)
}

fn unavailable(current: &[EmbeddingRow], baseline: &[EmbeddingRow], reason: &str) -> Draft {
    Draft {
        metric: "embeddings_unavailable".to_string(),
        value: 0.0,
        severity: Severity::Low,
        confidence: None,
        details: json!({
            "reason": reason,
            "current_embedding_count": current.len(),
            "baseline_embedding_count": baseline.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, model: &str, vector: Vec<f32>) -> EmbeddingRow {
        EmbeddingRow {
            id,
            finding_id: id,
            execution_id: 1,
            model: model.to_string(),
            vector,
        }
    }

    #[test]
    fn both_sides_empty_is_silent() {
        assert!(detect(&[], &[], &Settings::default()).unwrap().is_empty());
    }

    #[test]
    fn one_side_missing_degrades_to_unavailable() {
        let baseline = vec![row(1, "m", vec![1.0, 0.0])];
        let drafts = detect(&[], &baseline, &Settings::default()).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].metric, "embeddings_unavailable");
        assert_eq!(drafts[0].severity, Severity::Low);
    }

    #[test]
    fn model_mismatch_degrades_to_unavailable() {
        let current = vec![row(1, "m1", vec![1.0, 0.0])];
        let baseline = vec![row(2, "m2", vec![1.0, 0.0])];
        let drafts = detect(&current, &baseline, &Settings::default()).unwrap();
        assert_eq!(drafts[0].metric, "embeddings_unavailable");
        assert_eq!(drafts[0].details["reason"], "model name mismatch");
    }

    #[test]
    fn identical_centroids_are_silent() {
        let side = vec![row(1, "m", vec![1.0, 0.0]), row(2, "m", vec![1.0, 0.0])];
        assert!(detect(&side, &side, &Settings::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn orthogonal_centroids_are_critical() {
        let current = vec![row(1, "m", vec![1.0, 0.0])];
        let baseline = vec![row(2, "m", vec![0.0, 1.0])];
        let drafts = detect(&current, &baseline, &Settings::default()).unwrap();
        assert_eq!(drafts.len(), 1);
        let d = &drafts[0];
        assert_eq!(d.metric, "centroid_cosine_distance");
        assert!((d.value - 1.0).abs() < 1e-9);
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = vec![row(1, "m", vec![0.6, 0.8]), row(2, "m", vec![1.0, 0.0])];
        let b = vec![row(3, "m", vec![0.0, 1.0])];
        let d1 = detect(&a, &b, &Settings::default()).unwrap();
        let d2 = detect(&b, &a, &Settings::default()).unwrap();
        assert!((d1[0].value - d2[0].value).abs() < 1e-12);
    }

    #[test]
    fn dims_mismatch_is_a_channel_error() {
        let current = vec![row(1, "m", vec![1.0, 0.0])];
        let baseline = vec![row(2, "m", vec![1.0, 0.0, 0.0])];
        let err = detect(&current, &baseline, &Settings::default()).unwrap_err();
        assert!(matches!(err, EngineError::DriftChannel { .. }));
    }

    #[test]
    fn mild_drift_below_floor_is_omitted() {
        // cos between (1,0) and normalized (0.95, 0.312) ~ 0.95: distance 0.05.
        let current = vec![row(1, "m", vec![1.0, 0.0])];
        let baseline = vec![row(2, "m", vec![0.95, 0.312])];
        assert!(detect(&current, &baseline, &Settings::default())
            .unwrap()
            .is_empty());
    }
}
