//! Tool trait and registry
//!
//! Tools are offered to the model during generation. Each one wraps a
//! deterministic capability the pipeline already has (web search, the
//! finance engine) so the model can ask for more grounding mid-answer.

use crate::error::GenerationError;
use crate::finance::{build_model, FinancialInputs};
use crate::models::ToolCallRecord;
use crate::web_search::WebSearchAdapter;
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A single callable tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations in the `{name, description, parameters}` shape model APIs expect.
    pub fn declarations(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters(),
                })
            })
            .collect()
    }

    /// Run a tool on the model's behalf. Failures come back as an
    /// `{"error": ...}` payload so the model can carry on.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> (Value, ToolCallRecord) {
        let outcome = match self.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => Err(GenerationError::ToolNotFound(name.to_string())),
        };

        let success = outcome.is_ok();
        let payload = outcome.unwrap_or_else(|e| {
            warn!(tool = name, error = %e, "Tool call failed");
            json!({ "error": e.to_string() })
        });

        info!(tool = name, success, "Tool call completed");

        let record = ToolCallRecord {
            name: name.to_string(),
            arguments: arguments.clone(),
            success,
        };
        (payload, record)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_object(arguments: &Value) -> Result<()> {
    if arguments.is_object() {
        Ok(())
    } else {
        Err(GenerationError::InvalidToolInput(
            "arguments must be a JSON object".to_string(),
        ))
    }
}

/// Live web lookup through the shared adapter (cache + rate limit apply).
pub struct WebSearchTool {
    adapter: Arc<WebSearchAdapter>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(adapter: Arc<WebSearchAdapter>, max_results: usize) -> Self {
        Self {
            adapter,
            max_results,
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for current market data, competitors and trends"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        ensure_object(arguments)?;
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| GenerationError::InvalidToolInput("Expected 'query'".to_string()))?;

        let results = self.adapter.search(query, self.max_results).await?;
        Ok(json!({ "results": results }))
    }
}

/// Recompute the financial model from a full set of inputs.
pub struct FinanceRecomputeTool;

#[async_trait::async_trait]
impl Tool for FinanceRecomputeTool {
    fn name(&self) -> &'static str {
        "finance_recompute"
    }

    fn description(&self) -> &'static str {
        "Recompute unit economics and monthly projections for a what-if scenario"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "arpu": { "type": "number" },
                "acv": { "type": "number" },
                "cogs_pct": { "type": "number" },
                "variable_cost_per_user": { "type": "number" },
                "churn_rate": { "type": "number" },
                "expansion_rate": { "type": "number" },
                "starting_customers": { "type": "integer" },
                "new_customers_per_month": { "type": "integer" },
                "marketing_spend": { "type": "number" },
                "assumed_cac": { "type": "number" },
                "horizon_months": { "type": "integer" }
            }
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        ensure_object(arguments)?;
        let inputs: FinancialInputs = serde_json::from_value(arguments.clone())
            .map_err(|e| GenerationError::InvalidToolInput(e.to_string()))?;

        let model = build_model(&inputs)?;
        Ok(serde_json::to_value(model)?)
    }
}

/// Registry with the tools available during generation.
pub fn create_default_registry(web_search: Option<Arc<WebSearchAdapter>>, max_results: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if let Some(adapter) = web_search {
        registry.register(Arc::new(WebSearchTool::new(adapter, max_results)));
    }
    registry.register(Arc::new(FinanceRecomputeTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSearchConfig;
    use crate::models::WebResult;
    use crate::web_search::StaticWebSearchProvider;

    fn adapter() -> Arc<WebSearchAdapter> {
        let provider = StaticWebSearchProvider::new(vec![WebResult {
            title: "Coffee report".to_string(),
            url: "https://example.com/coffee".to_string(),
            snippet: "Coffee demand rose".to_string(),
        }]);
        Arc::new(WebSearchAdapter::new(Arc::new(provider), WebSearchConfig::default()))
    }

    #[test]
    fn test_declarations_are_sorted() {
        let registry = create_default_registry(Some(adapter()), 3);
        assert_eq!(registry.list(), vec!["finance_recompute", "web_search"]);
        let decls = registry.declarations();
        assert_eq!(decls[1]["name"], "web_search");
        assert_eq!(decls[1]["parameters"]["required"][0], "query");
    }

    #[tokio::test]
    async fn test_web_search_tool() {
        let registry = create_default_registry(Some(adapter()), 3);
        let (payload, record) = registry.invoke("web_search", &json!({"query": "coffee"})).await;
        assert!(record.success);
        assert_eq!(payload["results"][0]["url"], "https://example.com/coffee");
    }

    #[tokio::test]
    async fn test_finance_recompute_tool() {
        let registry = create_default_registry(None, 3);
        let args = json!({
            "arpu": 100.0,
            "cogs_pct": 0.3,
            "churn_rate": 0.05,
            "new_customers_per_month": 20,
            "marketing_spend": 8000.0,
            "horizon_months": 3
        });
        let (payload, record) = registry.invoke("finance_recompute", &args).await;
        assert!(record.success);
        assert_eq!(payload["unit_economics"]["ltv"], 1400.0);
        assert_eq!(payload["projections"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_become_error_payloads() {
        let registry = create_default_registry(None, 3);

        let (payload, record) = registry.invoke("stock_screener", &json!({})).await;
        assert!(!record.success);
        assert!(payload["error"].as_str().unwrap().contains("stock_screener"));

        let (payload, record) = registry
            .invoke(
                "finance_recompute",
                &json!({"cogs_pct": 0.3, "churn_rate": 2.0, "new_customers_per_month": 5}),
            )
            .await;
        assert!(!record.success);
        assert!(payload["error"].as_str().unwrap().contains("churn_rate"));
    }
}
