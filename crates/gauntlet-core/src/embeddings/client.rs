use crate::errors::EngineError;
use crate::storage::Store;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for the external embedding service. Posts
/// `{texts: [...], model: "..."}` and accepts the three reply shapes in the
/// wild: a bare array of vectors, `{embeddings: [...]}`, or OpenAI-style
/// `{data: [{embedding: [...]}]}`.
pub struct EmbeddingClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(60))
            .json(&json!({ "texts": texts, "model": self.model }))
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingService(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::EmbeddingService(format!(
                "embedding endpoint returned {status}"
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingService(e.without_url().to_string()))?;

        let vectors = parse_embedding_response(&body)?;
        if vectors.len() != texts.len() {
            return Err(EngineError::EmbeddingService(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Post-execution hook: embed every finding response that does not have a
    /// vector yet, in fixed-size batches. Returns the number of embeddings
    /// written. Failures are the caller's to log; the execution completes
    /// either way.
    pub async fn generate_for_execution(
        &self,
        store: &Store,
        execution_id: i64,
        batch_size: usize,
    ) -> Result<usize, EngineError> {
        let findings = store
            .findings_for_execution(execution_id)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let existing: std::collections::HashSet<i64> = store
            .embeddings_for_execution(execution_id)
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .into_iter()
            .map(|e| e.finding_id)
            .collect();

        let pending: Vec<(i64, String)> = findings
            .into_iter()
            .filter(|f| !existing.contains(&f.id))
            .filter_map(|f| {
                f.evidence_response
                    .filter(|r| !r.trim().is_empty())
                    .map(|r| (f.id, r))
            })
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.embed_batch(&texts).await?;
            for ((finding_id, _), vector) in batch.iter().zip(vectors) {
                let inserted = store
                    .insert_embedding(*finding_id, execution_id, &self.model, &vector)
                    .map_err(|e| EngineError::Persistence(e.to_string()))?;
                if inserted {
                    written += 1;
                }
            }
        }
        Ok(written)
    }
}

/// Decode one of the three accepted payload shapes into vectors, enforcing a
/// single shared dimension.
pub fn parse_embedding_response(body: &Value) -> Result<Vec<Vec<f32>>, EngineError> {
    let raw = if let Some(arr) = body.as_array() {
        arr.clone()
    } else if let Some(arr) = body.get("embeddings").and_then(Value::as_array) {
        arr.clone()
    } else if let Some(arr) = body.get("data").and_then(Value::as_array) {
        arr.iter()
            .map(|item| item.get("embedding").cloned().unwrap_or(Value::Null))
            .collect()
    } else {
        return Err(EngineError::EmbeddingService(
            "unrecognized embedding response shape".to_string(),
        ));
    };

    let mut vectors = Vec::with_capacity(raw.len());
    for entry in &raw {
        let Some(nums) = entry.as_array() else {
            return Err(EngineError::EmbeddingService(
                "embedding entry is not an array".to_string(),
            ));
        };
        let mut v = Vec::with_capacity(nums.len());
        for n in nums {
            match n.as_f64() {
                Some(x) => v.push(x as f32),
                None => {
                    return Err(EngineError::EmbeddingService(
                        "non-numeric embedding component".to_string(),
                    ))
                }
            }
        }
        vectors.push(v);
    }

    if let Some(first) = vectors.first() {
        let dims = first.len();
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(EngineError::EmbeddingService(
                "embedding vectors have inconsistent dimensions".to_string(),
            ));
        }
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_bare_array_shape() {
        let v = parse_embedding_response(&json!([[0.1, 0.2], [0.3, 0.4]])).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].len(), 2);
    }

    #[test]
    fn accepts_embeddings_key_shape() {
        let v = parse_embedding_response(&json!({"embeddings": [[1.0, 2.0]]})).unwrap();
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn accepts_openai_data_shape() {
        let v = parse_embedding_response(&json!({
            "data": [{"embedding": [1.0, 2.0]}, {"embedding": [3.0, 4.0]}]
        }))
        .unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[1][0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_ragged_dimensions() {
        let err = parse_embedding_response(&json!([[1.0, 2.0], [3.0]])).unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingService(_)));
    }

    #[test]
    fn rejects_unknown_shape() {
        assert!(parse_embedding_response(&json!({"vectors": []})).is_err());
        assert!(parse_embedding_response(&json!({"data": [{"no_embedding": 1}]})).is_err());
    }
}
