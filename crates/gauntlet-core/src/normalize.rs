use crate::model::{Finding, RawFinding, Severity};
use serde_json::Value;

/// Convert one adapter finding into the canonical schema. Ingest never
/// discards data: unknown severities fold to `info`, out-of-range confidence
/// is clamped, and any coercion is noted in the metadata so the validation
/// failure stays visible.
pub fn normalize(raw: RawFinding, execution_id: i64) -> Finding {
    let mut warnings: Vec<String> = Vec::new();

    let severity = match Severity::parse(&raw.severity.to_ascii_lowercase()) {
        Some(s) => s,
        None => {
            let folded = Severity::fold(&raw.severity);
            if folded == Severity::Info && !raw.severity.is_empty() {
                warnings.push(format!("unknown severity '{}'", raw.severity));
            }
            folded
        }
    };

    let confidence = raw.confidence.map(|c| {
        if !(0.0..=1.0).contains(&c) {
            warnings.push(format!("confidence {c} clamped to [0,1]"));
        }
        c.clamp(0.0, 1.0)
    });

    let library = if raw.library.is_empty() {
        warnings.push("missing library".to_string());
        "unknown".to_string()
    } else {
        raw.library
    };

    let test_category = if raw.test_category.is_empty() {
        warnings.push("missing test category".to_string());
        "unknown".to_string()
    } else {
        raw.test_category
    };

    let risk_type = if raw.risk_type.is_empty() {
        test_category.clone()
    } else {
        raw.risk_type
    };

    let mut metadata = match raw.metadata {
        Value::Null => Value::Object(Default::default()),
        v @ Value::Object(_) => v,
        other => serde_json::json!({ "raw": other }),
    };
    if !warnings.is_empty() {
        metadata["normalization_warnings"] = serde_json::json!(warnings);
    }

    Finding {
        id: 0,
        execution_id,
        library,
        test_category,
        severity,
        risk_type,
        evidence_prompt: raw.prompt,
        evidence_response: raw.response,
        confidence,
        metadata,
    }
}
