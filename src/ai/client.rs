use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const WHISPER_MODEL: &str = "whisper-1";

#[derive(Debug, Error)]
pub enum AiClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("completion contained no content")]
    EmptyCompletion,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Thin HTTP client for the OpenAI chat-completions and Whisper endpoints.
/// Constructed once at startup and injected; nothing in the crate reaches for
/// a process-wide instance.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            http,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One chat-completion round trip; returns the raw assistant text.
    pub async fn chat_completion(
        &self,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        system: &str,
        user: &str,
    ) -> Result<String, AiClientError> {
        let payload = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": temperature,
            "max_tokens": max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(AiClientError::EmptyCompletion)
    }

    /// Speech-to-text over Whisper; `audio` is the raw voice file bytes.
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String, AiClientError> {
        let part = Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")?;
        let form = Form::new().text("model", WHISPER_MODEL).part("file", part);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}
