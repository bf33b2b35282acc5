use super::{contains_any, run_probes, ProbeAdapter, Verdict};
use crate::model::{LlmConfig, RawFinding};
use crate::transport::LlmTransport;
use async_trait::async_trait;
use std::sync::Arc;

const CATEGORIES: [&str; 4] = [
    "prompt_quality",
    "regression",
    "output_validation",
    "prompt_comparison",
];

/// Output-quality probe suite: answer completeness, regressions on known-good
/// prompts, and structural validation.
pub struct PromptfooAdapter {
    transport: Arc<LlmTransport>,
}

impl PromptfooAdapter {
    pub fn new(transport: Arc<LlmTransport>) -> Self {
        Self { transport }
    }

    fn prompts(category: &str) -> &'static [&'static str] {
        match category {
            "prompt_quality" => &[
                "Explain quantum computing in simple terms.",
                "Write a professional email declining a meeting request.",
                "Summarize the key points of machine learning.",
            ],
            "regression" => &[
                "What is the capital of France?",
                "Calculate 15 * 23.",
                "Translate 'Hello' to Spanish.",
            ],
            "output_validation" => &[
                "List 3 benefits of exercise.",
                "Provide 5 tips for time management.",
                "Name 4 programming languages.",
            ],
            "prompt_comparison" => &[
                "Explain how photosynthesis works.",
                "Describe the water cycle.",
                "What is the difference between AI and ML?",
            ],
            _ => &[],
        }
    }

    fn classify(category: &str, response: &str) -> Verdict {
        let lower = response.to_lowercase();
        let unhelpful = ["sorry", "cannot", "unable", "i don't"];

        let severity = match category {
            "prompt_quality" => {
                if response.len() < 20 {
                    "high"
                } else if contains_any(&lower, &unhelpful) || lower.contains("error") {
                    "medium"
                } else {
                    "low"
                }
            }
            "regression" => {
                if response.len() < 10 || contains_any(&lower, &["error", "failed", "exception"]) {
                    "high"
                } else {
                    "low"
                }
            }
            "output_validation" => {
                if response.len() < 15 {
                    "medium"
                } else if response.chars().any(|c| c.is_ascii_digit())
                    || response.contains(':')
                    || response.contains('-')
                {
                    "low"
                } else {
                    "medium"
                }
            }
            "prompt_comparison" => {
                if response.len() < 30 || contains_any(&lower, &unhelpful) {
                    "medium"
                } else {
                    "low"
                }
            }
            _ => "low",
        };

        Verdict {
            severity,
            confidence: if matches!(severity, "critical" | "high") {
                0.80
            } else {
                0.70
            },
        }
    }
}

#[async_trait]
impl ProbeAdapter for PromptfooAdapter {
    fn name(&self) -> &'static str {
        "promptfoo"
    }

    fn supports(&self, category: &str) -> bool {
        CATEGORIES.contains(&category)
    }

    async fn execute(
        &self,
        cfg: &LlmConfig,
        categories: &[String],
    ) -> anyhow::Result<Vec<RawFinding>> {
        let mut findings = Vec::new();
        for category in categories.iter().filter(|c| self.supports(c)) {
            findings.extend(
                run_probes(
                    &self.transport,
                    cfg,
                    "promptfoo",
                    category,
                    Self::prompts(category),
                    |_, response| Self::classify(category, response),
                )
                .await,
            );
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_answer_is_high() {
        let v = PromptfooAdapter::classify("prompt_quality", "Qubits.");
        assert_eq!(v.severity, "high");
        assert!((v.confidence - 0.80).abs() < f64::EPSILON);
    }

    #[test]
    fn structured_list_passes_validation() {
        let v = PromptfooAdapter::classify(
            "output_validation",
            "1. Cardio health 2. Mood 3. Sleep quality",
        );
        assert_eq!(v.severity, "low");
    }

    #[test]
    fn regression_error_reply_is_high() {
        let v = PromptfooAdapter::classify("regression", "An internal error occurred upstream.");
        assert_eq!(v.severity, "high");
    }
}
