//! Tools the reasoning step can call mid-turn.
//!
//! A [`Tool`] describes itself with a name, a natural-language
//! description and a JSON Schema for its arguments; the agent sends these
//! to the model as function declarations. The model answers with a tool
//! request, which the agent dispatches through the [`ToolRegistry`].
//!
//! ```text
//! ┌────────────────────────────┐
//! │        ToolRegistry        │
//! │  ┌──────────────────────┐  │
//! │  │ search_knowledge_base│──┼──▶ SearchClient ──▶ ManagedIndex
//! │  └──────────────────────┘  │
//! └────────────────────────────┘
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::SearchQuery;
use crate::search::{format_context, SearchClient};

/// A callable capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in function declarations and tool requests.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) of the arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Errors are reported back to the model, not the user.
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// Function declaration sent to the reasoning backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tools available to an agent, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Searches the managed index and returns extractive passages.
pub struct SearchKnowledgeBase {
    client: SearchClient,
}

impl SearchKnowledgeBase {
    pub const NAME: &'static str = "search_knowledge_base";

    pub fn new(client: SearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBase {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Searches the document knowledge base and returns verbatim passages \
         and extracted answers relevant to the query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A detailed search query crafted from the user's question."
                },
                "filter": {
                    "type": "string",
                    "description": "Optional filter expression restricting which documents are searched."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let text = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing required argument 'query'"))?;
        if text.trim().is_empty() {
            bail!("argument 'query' must not be empty");
        }
        let query = SearchQuery {
            text: text.to_string(),
            filter: arguments
                .get("filter")
                .and_then(Value::as_str)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        };

        let results = self.client.search(&query).await?;
        Ok(json!({
            "context": format_context(&results),
            "results": results,
        }))
    }
}
