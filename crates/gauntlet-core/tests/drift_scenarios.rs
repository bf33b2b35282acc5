use gauntlet_core::baseline::BaselineRef;
use gauntlet_core::drift::DriftEngine;
use gauntlet_core::model::{
    DriftChannel, ExecutionStatus, Finding, LlmConfig, Pipeline, Severity, ToolCall,
};
use gauntlet_core::{EngineError, Settings, Store};
use serde_json::json;

struct Fixture {
    store: Store,
    pipeline_id: i64,
    cfg_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
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
        Self {
            store,
            pipeline_id,
            cfg_id,
        }
    }

    /// Create an execution, run `fill` while it is Running, then complete it.
    fn completed_execution(&self, fill: impl FnOnce(&Store, i64)) -> i64 {
        let id = self
            .store
            .create_execution(self.pipeline_id, self.cfg_id)
            .unwrap();
        self.store
            .transition_execution(id, ExecutionStatus::Pending, ExecutionStatus::Running)
            .unwrap();
        fill(&self.store, id);
        self.store
            .transition_execution(id, ExecutionStatus::Running, ExecutionStatus::Completed)
            .unwrap();
        id
    }

    fn engine(&self) -> DriftEngine {
        DriftEngine::new(self.store.clone(), Settings::default())
    }
}

fn finding(execution_id: i64, severity: Severity, response: &str) -> Finding {
    Finding {
        id: 0,
        execution_id,
        library: "garak".into(),
        test_category: "jailbreak".into(),
        severity,
        risk_type: "jailbreak".into(),
        evidence_prompt: Some("p".into()),
        evidence_response: Some(response.to_string()),
        confidence: Some(0.8),
        metadata: json!({}),
    }
}

fn insert_findings(store: &Store, execution_id: i64, severity: Severity, response: &str, n: usize) {
    for _ in 0..n {
        store
            .insert_finding(&finding(execution_id, severity, response))
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn empty_executions_drift_cleanly() {
    let fx = Fixture::new();
    let baseline = fx.completed_execution(|_, _| {});
    let current = fx.completed_execution(|_, _| {});

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    assert!(report.findings.is_empty());
    assert_eq!(report.drift_score, 100.0);
    assert_eq!(report.drift_grade, "A");
}

#[tokio::test]
async fn response_length_shift_is_critical_output_drift() {
    let fx = Fixture::new();
    let baseline = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, &"x".repeat(100), 20);
    });
    let current = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, &"x".repeat(500), 20);
    });

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let ks = report
        .findings
        .iter()
        .find(|f| f.metric == "response_length_ks")
        .unwrap();
    assert!((ks.value - 1.0).abs() < 1e-9);
    assert_eq!(ks.severity, Severity::Critical);
    assert_eq!(ks.channel, DriftChannel::Output);
    // Identical severity multisets: the safety channel stays silent.
    assert!(!report
        .findings
        .iter()
        .any(|f| f.channel == DriftChannel::Safety));
}

#[tokio::test]
async fn severity_shift_emits_psi_drift() {
    let fx = Fixture::new();
    let distributions: [(Severity, usize, usize); 5] = [
        (Severity::Critical, 2, 7),
        (Severity::High, 6, 5),
        (Severity::Medium, 6, 5),
        (Severity::Low, 4, 3),
        (Severity::Info, 2, 0),
    ];
    let baseline = fx.completed_execution(|s, id| {
        for (severity, base_n, _) in distributions {
            insert_findings(s, id, severity, "steady response", base_n);
        }
    });
    let current = fx.completed_execution(|s, id| {
        for (severity, _, cur_n) in distributions {
            insert_findings(s, id, severity, "steady response", cur_n);
        }
    });

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let psi = report
        .findings
        .iter()
        .find(|f| f.metric == "severity_psi")
        .unwrap();
    assert!((psi.value - 0.32).abs() <= 0.05, "psi {}", psi.value);
    assert_eq!(psi.severity, Severity::Critical);
}

#[tokio::test]
async fn missing_embeddings_degrade_to_low_finding() {
    let fx = Fixture::new();
    let baseline = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "hello world", 2);
        for f in s.findings_for_execution(id).unwrap() {
            s.insert_embedding(f.id, id, "embed-model", &[0.1, 0.2, 0.3])
                .unwrap();
        }
    });
    let current = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "hello world", 2);
    });

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let unavailable: Vec<_> = report
        .findings
        .iter()
        .filter(|f| f.metric == "embeddings_unavailable")
        .collect();
    assert_eq!(unavailable.len(), 1);
    assert_eq!(unavailable[0].severity, Severity::Low);
    assert_eq!(unavailable[0].channel, DriftChannel::Embedding);
    // The other channels proceeded normally (identical sides: silent).
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.drift_score, 98.0);
}

#[tokio::test]
async fn embedding_centroid_drift_is_detected() {
    let fx = Fixture::new();
    let baseline = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "hello", 1);
        let f = &s.findings_for_execution(id).unwrap()[0];
        s.insert_embedding(f.id, id, "embed-model", &[1.0, 0.0]).unwrap();
    });
    let current = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "hello", 1);
        let f = &s.findings_for_execution(id).unwrap()[0];
        s.insert_embedding(f.id, id, "embed-model", &[0.0, 1.0]).unwrap();
    });

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let centroid = report
        .findings
        .iter()
        .find(|f| f.metric == "centroid_cosine_distance")
        .unwrap();
    assert!((centroid.value - 1.0).abs() < 1e-9);
    assert_eq!(centroid.severity, Severity::Critical);
}

#[tokio::test]
async fn agent_tool_drift_covers_new_tools_and_loops() {
    let fx = Fixture::new();
    let with_trace = |tools: Vec<&str>| {
        json!({
            "agent_trace": tools
                .iter()
                .map(|t| json!({"tool": t}))
                .collect::<Vec<_>>()
        })
    };
    let baseline = fx.completed_execution(|s, id| {
        let mut f = finding(id, Severity::Low, "traced");
        f.metadata = with_trace(vec!["search", "answer"]);
        let fid = s.insert_finding(&f).unwrap().unwrap();
        s.insert_agent_trace(
            id,
            &gauntlet_core::model::AgentTrace {
                finding_id: fid,
                calls: vec![
                    ToolCall { tool: "search".into(), args: None, result: None },
                    ToolCall { tool: "answer".into(), args: None, result: None },
                ],
            },
        )
        .unwrap();
    });
    let current = fx.completed_execution(|s, id| {
        let mut f = finding(id, Severity::Low, "traced");
        f.metadata = with_trace(vec!["shell", "shell", "shell", "answer"]);
        let fid = s.insert_finding(&f).unwrap().unwrap();
        s.insert_agent_trace(
            id,
            &gauntlet_core::model::AgentTrace {
                finding_id: fid,
                calls: ["shell", "shell", "shell", "answer"]
                    .iter()
                    .map(|t| ToolCall { tool: t.to_string(), args: None, result: None })
                    .collect(),
            },
        )
        .unwrap();
    });

    let report = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let new_tool = report
        .findings
        .iter()
        .find(|f| f.metric == "new_tool")
        .unwrap();
    assert_eq!(new_tool.severity, Severity::Low);
    assert_eq!(new_tool.details["tool"], "shell");
    let looped = report
        .findings
        .iter()
        .find(|f| f.metric == "tool_loop")
        .unwrap();
    assert_eq!(looped.severity, Severity::Medium);
}

#[tokio::test]
async fn comparison_is_idempotent_per_pair() {
    let fx = Fixture::new();
    let baseline = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, &"x".repeat(100), 10);
    });
    let current = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Critical, &"x".repeat(500), 10);
    });

    let first = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();
    let second = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(baseline))
        .await
        .unwrap();

    assert_eq!(first.findings.len(), second.findings.len());
    assert_eq!(first.drift_score, second.drift_score);
    for (a, b) in first.findings.iter().zip(&second.findings) {
        assert_eq!(a.metric, b.metric);
        assert_eq!(a.channel, b.channel);
        assert_eq!(a.value, b.value);
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.details, b.details);
    }
    // Only one generation of rows remains persisted.
    assert_eq!(
        fx.store
            .drift_findings_for_pair(current, baseline)
            .unwrap()
            .len(),
        second.findings.len()
    );

    let harness = gauntlet_core::Harness::new(fx.store.clone(), Settings::default());
    let drift_summary = harness.summarize_drift(current, baseline).unwrap();
    assert_eq!(drift_summary.total, second.findings.len() as u64);
    assert_eq!(drift_summary.drift_score, second.drift_score);
    assert!(drift_summary.by_channel.contains_key("output"));

    let summary = harness.summarize(current).unwrap();
    assert_eq!(summary.drift_score, Some(second.drift_score));
    assert!(summary.drift_grade.is_some());
}

#[tokio::test]
async fn self_comparison_is_rejected_outside_self_check() {
    let fx = Fixture::new();
    let id = fx.completed_execution(|s, eid| {
        insert_findings(s, eid, Severity::Low, "same", 3);
    });

    let err = fx
        .engine()
        .compare(id, &BaselineRef::ExplicitId(id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BaselineNotUsable(_)));

    let report = DriftEngine::with_self_check(fx.store.clone(), Settings::default())
        .compare(id, &BaselineRef::ExplicitId(id))
        .await
        .unwrap();
    assert!(report.findings.is_empty());
    assert_eq!(report.drift_score, 100.0);
}

#[tokio::test]
async fn baseline_resolution_modes() {
    let fx = Fixture::new();
    let first = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "alpha", 2);
    });
    fx.store.create_baseline(first, "golden", Some("v1")).unwrap();
    let second = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "alpha", 2);
    });
    let current = fx.completed_execution(|s, id| {
        insert_findings(s, id, Severity::Low, "alpha", 2);
    });

    let by_tag = fx
        .engine()
        .compare(current, &BaselineRef::Tag("v1".into()))
        .await
        .unwrap();
    assert_eq!(by_tag.baseline_execution_id, first);

    let by_previous = fx
        .engine()
        .compare(current, &BaselineRef::Previous)
        .await
        .unwrap();
    assert_eq!(by_previous.baseline_execution_id, second);

    let err = fx
        .engine()
        .compare(current, &BaselineRef::Tag("missing".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BaselineNotFound(_)));
    // A failed resolution persists nothing new.
    assert!(fx
        .store
        .drift_findings_for_pair(current, current)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn incomplete_baseline_is_not_usable() {
    let fx = Fixture::new();
    let current = fx.completed_execution(|_, _| {});
    let pending = fx
        .store
        .create_execution(fx.pipeline_id, fx.cfg_id)
        .unwrap();

    let err = fx
        .engine()
        .compare(current, &BaselineRef::ExplicitId(pending))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BaselineNotUsable(_)));
}
