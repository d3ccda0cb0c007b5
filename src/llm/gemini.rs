//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling. Function calls
//! requested by the model are executed through the `ToolRegistry` and fed
//! back for at most `MAX_TOOL_ROUNDS` rounds.

use super::{ChatMessage, ModelProvider, ModelRequest, ModelResponse, Role, MAX_TOOL_ROUNDS};
use crate::error::GenerationError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

fn build_client() -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(60))
        .build()?)
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    async fn generate(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let url = format!("{}/{}:generateContent?key={}", self.base_url, model, self.api_key);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                GenerationError::Llm(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(GenerationError::Llm(format!("Gemini API error: {}", error_text)));
        }

        response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            GenerationError::Llm(format!("Gemini parse error: {}", e))
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        if self.api_key.is_empty() {
            return Err(GenerationError::Config("GEMINI_API_KEY not configured".to_string()));
        }

        let mut contents: Vec<Content> = request.messages.iter().map(Content::from_message).collect();
        let declarations = request
            .tools
            .map(|registry| registry.declarations())
            .filter(|decls| !decls.is_empty());

        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;
        let mut records = Vec::new();

        for round in 0..=MAX_TOOL_ROUNDS {
            // the last round withholds tools so the model has to answer
            let tools = match (&declarations, round < MAX_TOOL_ROUNDS) {
                (Some(decls), true) => Some(vec![ToolDeclarations {
                    function_declarations: decls.clone(),
                }]),
                _ => None,
            };

            let body = GeminiRequest {
                contents: contents.clone(),
                system_instruction: Some(SystemInstruction {
                    parts: vec![Part::text(&request.system)],
                }),
                tools,
                generation_config: GenerationConfig {
                    temperature: request.temperature,
                    top_p: 0.9,
                    max_output_tokens: request.max_output_tokens,
                },
            };

            info!(model = %request.model, round, "Calling Gemini API");
            let response = self.generate(&request.model, &body).await?;

            if let Some(usage) = &response.usage_metadata {
                tokens_in += usage.prompt_token_count;
                tokens_out += usage.candidates_token_count;
            }

            let candidate = response
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| GenerationError::Llm("No response from Gemini API".to_string()))?;

            let calls: Vec<FunctionCall> = candidate
                .content
                .parts
                .iter()
                .filter_map(|p| p.function_call.clone())
                .collect();

            let registry = match request.tools {
                Some(registry) if !calls.is_empty() => registry,
                _ => {
                    let text = candidate
                        .content
                        .parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect::<Vec<_>>()
                        .join("");

                    if text.trim().is_empty() {
                        return Err(GenerationError::Llm("Empty response from Gemini".to_string()));
                    }

                    info!(model = %request.model, tokens_in, tokens_out, "Gemini response received");

                    return Ok(ModelResponse {
                        text,
                        model: request.model,
                        tokens_in,
                        tokens_out,
                        tool_calls: records,
                    });
                }
            };

            let mut replies = Vec::with_capacity(calls.len());
            for call in &calls {
                let (payload, record) = registry.invoke(&call.name, &call.args).await;
                records.push(record);
                replies.push(Part::function_response(&call.name, payload));
            }

            contents.push(Content {
                role: Some("model".to_string()),
                parts: candidate.content.parts,
            });
            contents.push(Content {
                role: Some("user".to_string()),
                parts: replies,
            });
        }

        Err(GenerationError::Llm(format!(
            "no text answer after {} tool rounds",
            MAX_TOOL_ROUNDS
        )))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn from_message(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Model => "model",
        };
        Self {
            role: Some(role.to_string()),
            parts: vec![Part::text(&message.content)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn function_response(name: &str, payload: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.to_string(),
                response: payload,
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
