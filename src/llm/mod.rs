//! Model provider abstraction
//!
//! The executor talks to a `ModelProvider`; the Gemini client is the
//! production implementation and `MockModelProvider` backs tests and
//! offline runs.

use crate::error::GenerationError;
use crate::models::ToolCallRecord;
use crate::retrieval::estimate_tokens;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiProvider;

/// Upper bound on model/tool round trips within one completion.
pub const MAX_TOOL_ROUNDS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub struct ModelRequest<'a> {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call. `None` disables function calling.
    pub tools: Option<&'a ToolRegistry>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tool_calls: Vec<ToolCallRecord>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse>;
}

/// Price per million tokens, in US cents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Per-model price table. Unknown models are billed at `fallback`.
#[derive(Debug, Clone)]
pub struct ModelPricing {
    prices: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
}

impl ModelPricing {
    pub fn new(fallback: ModelPrice) -> Self {
        Self {
            prices: HashMap::new(),
            fallback,
        }
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn price(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.fallback)
    }

    pub fn cost_cents(&self, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        let price = self.price(model);
        let cost = tokens_in as f64 * price.input_per_million / 1_000_000.0
            + tokens_out as f64 * price.output_per_million / 1_000_000.0;
        (cost * 10_000.0).round() / 10_000.0
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        let flash = ModelPrice {
            input_per_million: 10.0,
            output_per_million: 40.0,
        };
        ModelPricing::new(flash)
            .with_price(
                "gemini-2.0-flash-lite",
                ModelPrice {
                    input_per_million: 7.5,
                    output_per_million: 30.0,
                },
            )
            .with_price("gemini-2.0-flash", flash)
    }
}

/// A request as the mock saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub tools_offered: Vec<String>,
}

/// Scripted provider for tests and offline runs.
///
/// Replies are consumed in order; the last one repeats. Scripted tool calls
/// are executed against the request's registry before replying.
pub struct MockModelProvider {
    replies: Mutex<VecDeque<String>>,
    last_reply: Mutex<String>,
    tool_calls: Vec<(String, Value)>,
    fail_with: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockModelProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self::with_replies(vec![reply.into()])
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            last_reply: Mutex::new(replies.last().cloned().unwrap_or_default()),
            replies: Mutex::new(replies.into()),
            tool_calls: Vec::new(),
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let mut mock = Self::with_replies(Vec::new());
        mock.fail_with = Some(message.into());
        mock
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.tool_calls.push((name.into(), arguments));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    fn next_reply(&self) -> String {
        match lock(&self.replies).pop_front() {
            Some(reply) => {
                *lock(&self.last_reply) = reply.clone();
                reply
            }
            None => lock(&self.last_reply).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelProvider for MockModelProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        lock(&self.requests).push(RecordedRequest {
            model: request.model.clone(),
            system: request.system.clone(),
            prompt: prompt.clone(),
            tools_offered: request
                .tools
                .map(|t| t.list().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        });

        if let Some(message) = &self.fail_with {
            return Err(GenerationError::Llm(message.clone()));
        }

        let mut records = Vec::new();
        if let Some(registry) = request.tools {
            for (name, arguments) in self.tool_calls.iter().take(MAX_TOOL_ROUNDS) {
                let (_, record) = registry.invoke(name, arguments).await;
                records.push(record);
            }
        }

        let text = self.next_reply();
        Ok(ModelResponse {
            tokens_in: estimate_tokens(&format!("{}\n{}", request.system, prompt)) as u64,
            tokens_out: estimate_tokens(&text) as u64,
            text,
            model: request.model,
            tool_calls: records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::create_default_registry;
    use serde_json::json;

    fn request(tools: Option<&ToolRegistry>) -> ModelRequest<'_> {
        ModelRequest {
            model: "gemini-2.0-flash-lite".to_string(),
            system: "system".to_string(),
            messages: vec![ChatMessage::user("hello there")],
            tools,
            temperature: 0.2,
            max_output_tokens: 512,
        }
    }

    #[test]
    fn test_pricing() {
        let pricing = ModelPricing::default();
        assert_eq!(pricing.cost_cents("gemini-2.0-flash-lite", 1_000_000, 0), 7.5);
        assert_eq!(pricing.cost_cents("gemini-2.0-flash", 0, 1_000_000), 40.0);
        assert_eq!(pricing.cost_cents("unknown-model", 1_000_000, 0), 10.0);
        assert_eq!(pricing.cost_cents("gemini-2.0-flash", 0, 0), 0.0);
    }

    #[tokio::test]
    async fn test_mock_replies_in_order_then_repeats() {
        let mock = MockModelProvider::with_replies(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(mock.complete(request(None)).await.unwrap().text, "one");
        assert_eq!(mock.complete(request(None)).await.unwrap().text, "two");
        assert_eq!(mock.complete(request(None)).await.unwrap().text, "two");
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(mock.requests()[0].prompt, "hello there");
    }

    #[tokio::test]
    async fn test_mock_runs_scripted_tool_calls() {
        let registry = create_default_registry(None, 3);
        let mock = MockModelProvider::new("done")
            .with_tool_call("finance_recompute", json!({"cogs_pct": 0.2, "churn_rate": 0.1, "new_customers_per_month": 3}))
            .with_tool_call("missing_tool", json!({}));

        let response = mock.complete(request(Some(&registry))).await.unwrap();
        assert_eq!(response.tool_calls.len(), 2);
        assert!(response.tool_calls[0].success);
        assert!(!response.tool_calls[1].success);
        assert_eq!(mock.requests()[0].tools_offered, vec!["finance_recompute"]);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockModelProvider::failing("model overloaded");
        let err = mock.complete(request(None)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Llm(_)));
    }
}
