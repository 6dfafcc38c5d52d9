//! VLM (Vision-Language Model) Client
//!
//! Chat-completions client used for product classification and for the
//! vision fallback of proforma extraction.

use aduana_utils::{AduanaError, AduanaResult, VLMConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::script_runner::parse_json_loose;

const SERVICE: &str = "vlm";

/// VLM client for JSON-mode vision prompts
pub struct VlmClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl VlmClient {
    pub fn new(config: &VLMConfig) -> AduanaResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AduanaError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Send a system prompt plus a user turn with images, and parse the
    /// answer as a JSON object.
    pub async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_urls: &[String],
    ) -> AduanaResult<Value> {
        let content = self.chat(system_prompt, user_prompt, image_urls).await?;
        parse_json_loose(&content)
            .filter(Value::is_object)
            .ok_or_else(|| AduanaError::external_service(SERVICE, "VLM answer is not a JSON object"))
    }

    /// Send a system prompt plus a user turn with images and return the raw
    /// answer text. A reply without content yields an empty string.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_urls: &[String],
    ) -> AduanaResult<String> {
        if self.api_key.trim().is_empty() {
            return Err(AduanaError::configuration("VLM API key is not configured"));
        }

        let mut content = vec![VlmContent::Text {
            text: user_prompt.to_string(),
        }];
        content.extend(image_urls.iter().map(|url| VlmContent::Image {
            image_url: ImageUrl { url: url.clone() },
        }));

        let request = VlmRequest {
            model: self.model.clone(),
            messages: vec![
                VlmMessage {
                    role: "system".to_string(),
                    content: vec![VlmContent::Text {
                        text: system_prompt.to_string(),
                    }],
                },
                VlmMessage {
                    role: "user".to_string(),
                    content,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        tracing::debug!(model = %self.model, images = image_urls.len(), "Calling VLM API");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AduanaError::external_service(SERVICE, format!("Failed to call VLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AduanaError::external_service(
                SERVICE,
                format!("VLM API error {}: {}", status, error_text),
            ));
        }

        let result: VlmResponse = response
            .json()
            .await
            .map_err(|e| AduanaError::external_service(SERVICE, format!("Failed to parse VLM response: {}", e)))?;

        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// VLM API request
#[derive(Debug, Serialize)]
struct VlmRequest {
    model: String,
    messages: Vec<VlmMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct VlmMessage {
    role: String,
    content: Vec<VlmContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum VlmContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// VLM API response
#[derive(Debug, Deserialize)]
struct VlmResponse {
    choices: Vec<VlmChoice>,
}

#[derive(Debug, Deserialize)]
struct VlmChoice {
    message: VlmChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct VlmChoiceMessage {
    content: Option<String>,
}
