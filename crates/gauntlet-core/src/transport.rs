use crate::errors::EngineError;
use crate::model::LlmConfig;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;

/// Shared HTTP client for every probe adapter. Renders the configured payload
/// template, enforces timeout and bounded retries, and extracts the textual
/// reply from whatever JSON shape the gateway returns.
///
/// Header values are secrets and are never logged.
pub struct LlmTransport {
    client: reqwest::Client,
}

impl Default for LlmTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Send one probe prompt to the configured endpoint and return the
    /// extracted response text.
    pub async fn complete(
        &self,
        cfg: &LlmConfig,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, EngineError> {
        let payload = render_payload(cfg.payload_template.as_deref(), prompt, system_prompt)?;
        let method: reqwest::Method = cfg
            .method
            .parse()
            .map_err(|_| EngineError::PayloadRender(format!("invalid method '{}'", cfg.method)))?;

        let mut last_err = EngineError::Transport("no attempts made".to_string());
        for attempt in 0..=cfg.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let mut req = self
                .client
                .request(method.clone(), &cfg.endpoint_url)
                .timeout(Duration::from_secs(cfg.timeout_seconds))
                .json(&payload);
            for (k, v) in &cfg.headers {
                req = req.header(k.as_str(), v.as_str());
            }

            tracing::debug!(endpoint = %cfg.endpoint_url, attempt, "llm request");
            let resp = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_err = e.into();
                    continue;
                }
            };

            let status = resp.status();
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => {
                    last_err = e.into();
                    continue;
                }
            };
            if status.is_success() {
                return extract_response_text(&body);
            }

            let err = EngineError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&body, 500),
            };
            if !err.is_retriable() {
                return Err(err);
            }
            last_err = err;
        }
        Err(last_err)
    }
}

/// Exponential backoff: base 0.5s, factor 2, cap 8s, plus up to 10% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(10));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 10);
    Duration::from_millis(capped + jitter)
}

/// Two-pass payload rendering: substitute the placeholders in the raw JSON
/// text, then parse. Keeps the user's JSON intent intact and fails loudly on
/// malformed templates. If the parsed object carried a placeholder but has no
/// `messages` array, a chat-style `messages` array is synthesized so
/// OpenAI-chat and non-chat gateways behave uniformly.
pub fn render_payload(
    template: Option<&str>,
    prompt: &str,
    system_prompt: Option<&str>,
) -> Result<Value, EngineError> {
    let template = match template {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Ok(default_messages_payload(prompt, system_prompt)),
    };

    let had_placeholder =
        template.contains("{prompt}") || template.contains("{system_prompt}");

    let mut rendered = template.replace("{prompt}", &json_escape(prompt));
    rendered = rendered.replace(
        "{system_prompt}",
        &json_escape(system_prompt.unwrap_or("")),
    );

    let mut payload: Value = serde_json::from_str(&rendered)
        .map_err(|e| EngineError::PayloadRender(format!("template is not valid JSON: {e}")))?;

    if had_placeholder {
        if let Value::Object(obj) = &mut payload {
            if !obj.contains_key("messages") {
                obj.insert("messages".to_string(), messages_array(prompt, system_prompt));
            }
        }
    }
    Ok(payload)
}

fn default_messages_payload(prompt: &str, system_prompt: Option<&str>) -> Value {
    json!({ "messages": messages_array(prompt, system_prompt) })
}

fn messages_array(prompt: &str, system_prompt: Option<&str>) -> Value {
    let mut messages = Vec::new();
    if let Some(sys) = system_prompt {
        messages.push(json!({ "role": "system", "content": sys }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    Value::Array(messages)
}

/// Escape a value for splicing into the middle of a JSON string literal.
fn json_escape(s: &str) -> String {
    let quoted = serde_json::to_string(s).expect("string serialization is infallible");
    quoted[1..quoted.len() - 1].to_string()
}

/// Pull the reply text out of a gateway response body. Probes the known
/// shapes in order; an error envelope raises so the caller can record an
/// `adapter_error` finding.
pub fn extract_response_text(body: &str) -> Result<String, EngineError> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Ok(body.to_string()),
    };

    let candidates = [
        parsed.pointer("/choices/0/message/content"),
        parsed.pointer("/choices/0/text"),
        parsed.pointer("/content/0/text"),
        parsed.get("content"),
        parsed.get("response"),
        parsed.get("output"),
        parsed.get("text"),
        Some(&parsed),
    ];
    for c in candidates.into_iter().flatten() {
        if let Some(s) = c.as_str() {
            if !s.is_empty() {
                return Ok(s.to_string());
            }
        }
    }

    if parsed.get("error").is_some() {
        let message = parsed
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("endpoint returned an error envelope");
        return Err(EngineError::Adapter(message.to_string()));
    }

    Ok(body.to_string())
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
