use serde::{Deserialize, Serialize};

use super::client::{AiClientError, OpenAiClient};
use crate::config::{Config, FallbackBands};

const SYSTEM_INSTRUCTION: &str =
    "You are an expert instructor. Reply in JSON format only.";

const PROMPT_TEMPLATE: &str = r#"You are an expert instructor in maritime cargo operations. Your task is to grade a student's answer based STRICTLY on the study material provided below.

### Study material:
---
{theory_text}
---

### Task under review:
Question: "{question_text}"
Student's answer: "{user_answer_text}"

### Grading criteria:
1. Coverage - does the answer address the main aspects of the question
2. Correctness - do the facts in the answer match the study material
3. Understanding - does the student demonstrate a grasp of the topic

### Instructions:
- Judge STRICTLY against the provided material
- If the answer captures the essence but is incomplete, count it as sufficient
- If the answer contains serious mistakes or is entirely wrong, count it as insufficient
- Recommendations must be specific and refer back to the material

### Output format (JSON ONLY):
{"is_sufficient": boolean, "recommendation": "a short recommendation for the student"}"#;

const UNPARSEABLE_RECOMMENDATION: &str =
    "Review the material and try to give a more detailed answer.";

/// The (sufficient?, recommendation) pair produced by grading one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_sufficient: bool,
    pub recommendation: String,
}

/// Stateless grading contract. Implementations never fail: every answer gets
/// a verdict, degraded or not.
pub trait EvaluateAnswer {
    async fn evaluate(&self, theory: &str, question: &str, answer: &str) -> Verdict;
}

pub trait Transcribe {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, AiClientError>;
}

/// AI-backed evaluator with a deterministic local fallback.
#[derive(Clone)]
pub struct OpenAiEvaluator {
    client: OpenAiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
    bands: FallbackBands,
}

impl OpenAiEvaluator {
    pub fn new(client: OpenAiClient, config: &Config) -> Self {
        Self {
            client,
            model: config.openai_model.clone(),
            temperature: config.openai_temperature,
            max_tokens: config.openai_max_tokens,
            bands: config.fallback_bands,
        }
    }
}

impl EvaluateAnswer for OpenAiEvaluator {
    async fn evaluate(&self, theory: &str, question: &str, answer: &str) -> Verdict {
        let prompt = build_prompt(theory, question, answer);

        match self
            .client
            .chat_completion(
                &self.model,
                self.temperature,
                self.max_tokens,
                SYSTEM_INSTRUCTION,
                &prompt,
            )
            .await
        {
            Ok(raw) => parse_verdict(&raw).unwrap_or_else(|| {
                tracing::error!(response = %raw, "unparseable grading response");
                Verdict {
                    is_sufficient: false,
                    recommendation: UNPARSEABLE_RECOMMENDATION.to_string(),
                }
            }),
            Err(e) => {
                tracing::warn!(error = %e, "AI service unavailable, using local heuristic");
                fallback_verdict(answer, &self.bands)
            }
        }
    }
}

impl Transcribe for OpenAiEvaluator {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, AiClientError> {
        self.client.transcribe(audio).await
    }
}

fn build_prompt(theory: &str, question: &str, answer: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{theory_text}", theory)
        .replace("{question_text}", question)
        .replace("{user_answer_text}", answer)
}

/// Expects strict JSON with `is_sufficient` and `recommendation` keys.
/// Returns `None` for anything else; the caller substitutes a canned verdict.
fn parse_verdict(raw: &str) -> Option<Verdict> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let is_sufficient = value.get("is_sufficient")?.as_bool()?;
    let recommendation = value.get("recommendation")?.as_str()?.to_string();
    Some(Verdict {
        is_sufficient,
        recommendation,
    })
}

/// Length-band heuristic used when the AI service cannot be reached. Always
/// produces a verdict.
pub fn fallback_verdict(answer: &str, bands: &FallbackBands) -> Verdict {
    let length = answer.trim().chars().count();

    let (is_sufficient, recommendation) = if length < bands.short {
        (
            false,
            "The answer is too short. Try to give a more detailed answer.",
        )
    } else if length < bands.brief {
        (
            false,
            "The answer is brief. Add more details from the studied material.",
        )
    } else if length < bands.adequate {
        (true, "Good answer! Keep going with the next topics.")
    } else {
        (
            true,
            "Excellent detailed answer! You have absorbed the material well.",
        )
    };

    Verdict {
        is_sufficient,
        recommendation: recommendation.to_string(),
    }
}
