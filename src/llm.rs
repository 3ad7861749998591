//! LLM seam: provider-format chat messages, the completion client trait and
//! model pricing.
//!
//! The transport itself (HTTP, retries, provider quirks) lives outside this
//! crate. Anything implementing [`LlmClient`] can drive a worker.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as returned by the model; may be malformed
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One provider-format chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant message carrying a single tool invocation
    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            tool_calls: vec![call],
            ..Self::plain(ChatRole::Assistant, "")
        }
    }

    /// Tool result answering `call_id`
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// JSON-schema description of a tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token counts reported with a completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A single chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Names of the tools offered in this request
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// The model's answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Chat completion transport.
///
/// Implementations handle their own retries; an `Err` is final for that
/// call and pauses the worker that issued it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// USD price per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, usage: Usage) -> f64 {
        (usage.prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Per-model prices with a fallback for unlisted models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,
    pub fallback: ModelPricing,
}

impl PricingTable {
    /// Price for `model`. Exact names win; otherwise the longest listed prefix
    /// (dated snapshots such as `gpt-4o-2024-08-06`), then the fallback.
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        if let Some(p) = self.models.get(model) {
            return *p;
        }
        self.models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, p)| *p)
            .unwrap_or(self.fallback)
    }

    pub fn price(&self, model: &str, usage: Usage) -> f64 {
        self.pricing_for(model).cost(usage)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let models = [
            ("gpt-4o", ModelPricing::new(2.5, 10.0)),
            ("gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
            ("gpt-4.1", ModelPricing::new(2.0, 8.0)),
            ("gpt-4.1-mini", ModelPricing::new(0.4, 1.6)),
            ("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0)),
            ("claude-3-5-haiku", ModelPricing::new(0.8, 4.0)),
            ("claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
        ]
        .into_iter()
        .map(|(name, p)| (name.to_string(), p))
        .collect();

        Self {
            models,
            fallback: ModelPricing::new(1.0, 3.0),
        }
    }
}
