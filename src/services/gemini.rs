use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::GenerationConfig;
use crate::services::TextGenerator;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

impl WireGenerationConfig {
    /// Returns `None` when nothing is set so the provider defaults apply.
    fn from_config(config: &GenerationConfig) -> Option<Self> {
        if *config == GenerationConfig::default() {
            return None;
        }
        Some(Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn reply_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Google Gemini `generateContent` client. Holds only read-only configuration,
/// so one instance is shared by all requests.
pub struct GeminiService {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiService {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(prompt: &str, config: &GenerationConfig) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: WireGenerationConfig::from_config(config),
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let request = Self::build_request(prompt, config);

        log::info!("🤖 Sending request to Gemini with model: {}", self.model);
        log::debug!("📤 Generation config: {:?}", config);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        log::debug!("📥 Gemini response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::error!("❌ Gemini API error ({}): {}", status, error_text);
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read Gemini response body")?;
        log::debug!("📄 Raw Gemini response size: {} bytes", response_text.len());

        let parsed: GenerateContentResponse =
            serde_json::from_str(&response_text).context("Failed to decode Gemini response")?;

        match parsed.reply_text() {
            Some(text) => Ok(text),
            None => {
                let reason = parsed
                    .prompt_feedback
                    .and_then(|feedback| feedback.block_reason)
                    .unwrap_or_else(|| "no text in first candidate".to_string());
                log::warn!("⚠️ Gemini returned an empty reply: {}", reason);
                anyhow::bail!("Gemini returned no text ({})", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_uses_camel_case_config() {
        let request = GeminiService::build_request("hello", &GenerationConfig::STRUCTURED);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 450);
        assert!(body["generationConfig"].get("topK").is_none());
    }

    #[test]
    fn test_default_config_is_omitted() {
        let request = GeminiService::build_request("hello", &GenerationConfig::default());
        let body = serde_json::to_value(&request).unwrap();

        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "{\"a\":"}, {"text": "1}"}]
                },
                "finishReason": "STOP"
            }]
        }"#;

        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.reply_text().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_reply_text_missing_when_blocked() {
        let json = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;

        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert!(response.reply_text().is_none());
        assert_eq!(
            response.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let service = GeminiService::new(
            "test_key".to_string(),
            "gemini-1.5-flash".to_string(),
            "http://localhost:9000/".to_string(),
        );

        assert_eq!(
            service.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(service.model_name(), "gemini-1.5-flash");
    }
}
