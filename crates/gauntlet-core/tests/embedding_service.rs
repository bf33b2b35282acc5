use gauntlet_core::embeddings::EmbeddingClient;
use gauntlet_core::model::{ExecutionStatus, Finding, LlmConfig, Pipeline, Severity};
use gauntlet_core::{EngineError, Store};
use httpmock::prelude::*;
use serde_json::json;

fn seeded_running_execution(store: &Store, responses: &[&str]) -> i64 {
    let cfg_id = store
        .insert_llm_config(&LlmConfig {
            id: 0,
            name: "target".into(),
            endpoint_url: "http://127.0.0.1:9/unused".into(),
            method: "POST".into(),
            headers: Default::default(),
            payload_template: None,
            timeout_seconds: 5,
            max_retries: 0,
            environment: "test".into(),
        })
        .unwrap();
    let pipeline_id = store
        .insert_pipeline(&Pipeline {
            id: 0,
            name: "suite".into(),
            libraries: vec!["garak".into()],
            test_categories: vec!["jailbreak".into()],
            severity_thresholds: Default::default(),
            llm_config_id: cfg_id,
        })
        .unwrap();
    let execution_id = store.create_execution(pipeline_id, cfg_id).unwrap();
    store
        .transition_execution(execution_id, ExecutionStatus::Pending, ExecutionStatus::Running)
        .unwrap();
    for response in responses {
        store
            .insert_finding(&Finding {
                id: 0,
                execution_id,
                library: "garak".into(),
                test_category: "jailbreak".into(),
                severity: Severity::Low,
                risk_type: "jailbreak".into(),
                evidence_prompt: Some("p".into()),
                evidence_response: Some(response.to_string()),
                confidence: None,
                metadata: json!({}),
            })
            .unwrap()
            .unwrap();
    }
    execution_id
}

#[tokio::test]
async fn hook_embeds_every_response_and_is_incremental() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(json!({"embeddings": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]}));
        })
        .await;

    let store = Store::open_in_memory().unwrap();
    store.init_schema().unwrap();
    let execution_id = seeded_running_execution(&store, &["one", "two", "three"]);

    let client = EmbeddingClient::new(server.url("/embed"), "embed-model".into());
    let written = client
        .generate_for_execution(&store, execution_id, 32)
        .await
        .unwrap();
    assert_eq!(written, 3);
    assert_eq!(mock.hits_async().await, 1);

    let rows = store.embeddings_for_execution(execution_id).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.model == "embed-model"));
    assert!(rows.iter().all(|r| r.vector.len() == 2));

    // Second pass finds nothing left to embed.
    let written = client
        .generate_for_execution(&store, execution_id, 32)
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn hook_batches_requests() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200).json_body(json!([[1.0, 0.0], [0.0, 1.0]]));
        })
        .await;

    let store = Store::open_in_memory().unwrap();
    store.init_schema().unwrap();
    let responses: Vec<String> = (0..4).map(|i| format!("text {i}")).collect();
    let refs: Vec<&str> = responses.iter().map(String::as_str).collect();
    let execution_id = seeded_running_execution(&store, &refs);

    let client = EmbeddingClient::new(server.url("/embed"), "embed-model".into());
    let written = client
        .generate_for_execution(&store, execution_id, 2)
        .await
        .unwrap();
    assert_eq!(written, 4);
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn bare_array_and_openai_shapes_are_accepted() {
    let server = MockServer::start_async().await;
    let bare = server
        .mock_async(|when, then| {
            when.method(POST).path("/bare");
            then.status(200).json_body(json!([[0.5, 0.5]]));
        })
        .await;
    let openai = server
        .mock_async(|when, then| {
            when.method(POST).path("/openai");
            then.status(200)
                .json_body(json!({"data": [{"embedding": [0.5, 0.5]}]}));
        })
        .await;

    let texts = vec!["hello".to_string()];
    let from_bare = EmbeddingClient::new(server.url("/bare"), "m".into())
        .embed_batch(&texts)
        .await
        .unwrap();
    let from_openai = EmbeddingClient::new(server.url("/openai"), "m".into())
        .embed_batch(&texts)
        .await
        .unwrap();
    assert_eq!(from_bare, from_openai);
    assert_eq!(bare.hits_async().await, 1);
    assert_eq!(openai.hits_async().await, 1);
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/ragged");
            then.status(200).json_body(json!([[1.0, 2.0], [3.0]]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/short");
            then.status(200).json_body(json!([[1.0, 2.0]]));
        })
        .await;

    let texts = vec!["a".to_string(), "b".to_string()];
    let err = EmbeddingClient::new(server.url("/ragged"), "m".into())
        .embed_batch(&texts)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmbeddingService(_)));

    // Right shape, wrong cardinality.
    let err = EmbeddingClient::new(server.url("/short"), "m".into())
        .embed_batch(&texts)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmbeddingService(_)));
}

#[tokio::test]
async fn unreachable_service_is_a_typed_error() {
    let client = EmbeddingClient::new("http://127.0.0.1:1/embed".into(), "m".into());
    let err = client
        .embed_batch(&["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmbeddingService(_)));
}
