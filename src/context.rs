//! Worker conversation history as an ordered log of typed blocks
//!
//! The flattened message sequence sent to the model is the concatenation of
//! every block's messages in insertion order. A TOOL block always carries the
//! assistant invocation and its result together, so pairs stay adjacent no
//! matter what is appended around them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{ChatMessage, ToolCall};
use crate::protocol::preview;

/// Label carried by a tool block until its result arrives
pub const PENDING_LABEL: &str = "(pending)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    System,
    User,
    Assistant,
    Parent,
    Context,
    Tool,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::Parent => "PARENT",
            Self::Context => "CONTEXT",
            Self::Tool => "TOOL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Mailbox the pending result will arrive through
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

impl BlockMetadata {
    fn now() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: None,
            tool_call_id: None,
            conversation_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub block_type: BlockType,
    pub label: String,
    pub messages: Vec<ChatMessage>,
    pub metadata: BlockMetadata,
}

impl ContextBlock {
    fn new(block_type: BlockType, label: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            block_type,
            label: label.into(),
            messages,
            metadata: BlockMetadata::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.block_type == BlockType::Tool && self.label == PENDING_LABEL
    }

    /// Content of the last message, the result for TOOL blocks
    pub fn content(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

/// Read-only diagnostics over a [`ContextLog`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextStats {
    pub total_blocks: usize,
    pub total_messages: usize,
    pub blocks_by_type: BTreeMap<BlockType, usize>,
    pub pending_tool_blocks: usize,
    pub total_chars: usize,
}

/// Ordered, append-mostly history of one worker
#[derive(Debug, Clone, Default)]
pub struct ContextLog {
    blocks: Vec<ContextBlock>,
}

impl ContextLog {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Install the system prompt. There is at most one SYSTEM block and it is
    /// always first; a second call replaces it.
    pub fn add_system_block(&mut self, label: impl Into<String>, prompt: impl Into<String>) -> usize {
        self.blocks.retain(|b| b.block_type != BlockType::System);
        let block = ContextBlock::new(BlockType::System, label, vec![ChatMessage::system(prompt)]);
        self.blocks.insert(0, block);
        0
    }

    pub fn add_user_block(&mut self, label: impl Into<String>, content: impl Into<String>) -> usize {
        self.push(ContextBlock::new(BlockType::User, label, vec![ChatMessage::user(content)]))
    }

    pub fn add_assistant_block(
        &mut self,
        label: impl Into<String>,
        content: impl Into<String>,
    ) -> usize {
        self.push(ContextBlock::new(
            BlockType::Assistant,
            label,
            vec![ChatMessage::assistant(content)],
        ))
    }

    /// Message from the parent worker; seen by the model as a user turn
    pub fn add_parent_block(&mut self, label: impl Into<String>, content: impl Into<String>) -> usize {
        self.push(ContextBlock::new(BlockType::Parent, label, vec![ChatMessage::user(content)]))
    }

    pub fn add_context_block(&mut self, label: impl Into<String>, content: impl Into<String>) -> usize {
        self.push(ContextBlock::new(BlockType::Context, label, vec![ChatMessage::user(content)]))
    }

    /// Tool call whose result is already known
    pub fn add_single_tool_block(&mut self, call: &ToolCall, result: impl Into<String>) -> usize {
        let mut block = ContextBlock::new(
            BlockType::Tool,
            call.name.clone(),
            vec![
                ChatMessage::assistant_tool_call(call.clone()),
                ChatMessage::tool_result(call.id.clone(), call.name.clone(), result),
            ],
        );
        block.metadata.tool_call_id = Some(call.id.clone());
        self.push(block)
    }

    /// First half of a two-phase tool block; resolve it with
    /// [`update_tool_block_result`](Self::update_tool_block_result).
    pub fn add_pending_tool_block(&mut self, call: &ToolCall, conversation_id: Option<Uuid>) -> usize {
        let mut block = ContextBlock::new(
            BlockType::Tool,
            PENDING_LABEL,
            vec![
                ChatMessage::assistant_tool_call(call.clone()),
                ChatMessage::tool_result(call.id.clone(), call.name.clone(), PENDING_LABEL),
            ],
        );
        block.metadata.tool_call_id = Some(call.id.clone());
        block.metadata.conversation_id = conversation_id;
        self.push(block)
    }

    /// Resolve the pending block for `tool_call_id` in place. Returns `false`
    /// when there is no pending block for that id, so a block is never
    /// resolved twice.
    pub fn update_tool_block_result(&mut self, tool_call_id: &str, result: impl Into<String>) -> bool {
        let Some(block) = self.blocks.iter_mut().find(|b| {
            b.is_pending() && b.metadata.tool_call_id.as_deref() == Some(tool_call_id)
        }) else {
            return false;
        };

        let tool_name = block
            .messages
            .first()
            .and_then(|m| m.tool_calls.first())
            .map(|c| c.name.clone())
            .unwrap_or_default();
        block.label = tool_name;
        if let Some(result_msg) = block.messages.last_mut() {
            result_msg.content = result.into();
        }
        block.metadata.updated_at = Some(Utc::now());
        true
    }

    /// Remove every block of `block_type`; used to refresh CONTEXT blocks.
    pub fn remove_blocks_by_type(&mut self, block_type: BlockType) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.block_type != block_type);
        before - self.blocks.len()
    }

    /// Exact message sequence for the next completion call
    pub fn to_completion_messages(&self) -> Vec<ChatMessage> {
        self.blocks
            .iter()
            .flat_map(|b| b.messages.iter().cloned())
            .collect()
    }

    pub fn blocks(&self) -> &[ContextBlock] {
        &self.blocks
    }

    pub fn last(&self) -> Option<&ContextBlock> {
        self.blocks.last()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Find the tool block for a given call id, pending or resolved
    pub fn tool_block(&self, tool_call_id: &str) -> Option<&ContextBlock> {
        self.blocks.iter().find(|b| {
            b.block_type == BlockType::Tool && b.metadata.tool_call_id.as_deref() == Some(tool_call_id)
        })
    }

    /// Ids of tool blocks still waiting for a result
    pub fn pending_tool_call_ids(&self) -> Vec<String> {
        self.blocks
            .iter()
            .filter(|b| b.is_pending())
            .filter_map(|b| b.metadata.tool_call_id.clone())
            .collect()
    }

    pub fn stats(&self) -> ContextStats {
        let mut stats = ContextStats {
            total_blocks: self.blocks.len(),
            ..Default::default()
        };
        for block in &self.blocks {
            *stats.blocks_by_type.entry(block.block_type).or_default() += 1;
            stats.total_messages += block.messages.len();
            stats.total_chars += block.messages.iter().map(|m| m.content.len()).sum::<usize>();
            if block.is_pending() {
                stats.pending_tool_blocks += 1;
            }
        }
        stats
    }

    pub fn debug_summary(&self) -> String {
        let stats = self.stats();
        let mut out = format!(
            "{} blocks, {} messages, {} chars, {} pending\n",
            stats.total_blocks, stats.total_messages, stats.total_chars, stats.pending_tool_blocks
        );
        for (i, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{i}] {} {} ({} msg): {}",
                block.block_type,
                block.label,
                block.messages.len(),
                preview(block.content(), 60)
            );
        }
        out
    }

    fn push(&mut self, block: ContextBlock) -> usize {
        self.blocks.push(block);
        self.blocks.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatRole;

    fn log_with_system() -> ContextLog {
        let mut log = ContextLog::new();
        log.add_system_block("Developer", "You write code.");
        log
    }

    #[test]
    fn test_completion_messages_start_with_single_system() {
        let mut log = log_with_system();
        log.add_user_block("user", "fix the bug");
        log.add_system_block("Developer", "You write better code.");
        log.add_assistant_block("Developer", "on it");

        let messages = log.to_completion_messages();
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[0].content, "You write better code.");
        assert_eq!(
            messages.iter().filter(|m| m.role == ChatRole::System).count(),
            1
        );
    }

    #[test]
    fn test_flatten_preserves_insertion_order() {
        let mut log = log_with_system();
        log.add_parent_block("parent", "task");
        log.add_single_tool_block(&ToolCall::new("c1", "read_file", "{}"), "contents");
        log.add_assistant_block("Developer", "done reading");

        let messages = log.to_completion_messages();
        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::Tool,
                ChatRole::Assistant
            ]
        );
        assert_eq!(messages[2].tool_calls[0].id, "c1");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_pending_block_resolves_once() {
        let mut log = log_with_system();
        let call = ToolCall::new("c9", "delegate_task", r#"{"role":"developer","task":"x"}"#);
        let idx = log.add_pending_tool_block(&call, Some(Uuid::new_v4()));

        assert!(log.blocks()[idx].is_pending());
        assert_eq!(log.blocks()[idx].label, PENDING_LABEL);
        assert_eq!(log.pending_tool_call_ids(), vec!["c9".to_string()]);

        assert!(log.update_tool_block_result("c9", "child result"));
        let block = &log.blocks()[idx];
        assert_eq!(block.label, "delegate_task");
        assert_eq!(block.content(), "child result");
        assert!(block.metadata.updated_at.is_some());

        assert!(!log.update_tool_block_result("c9", "again"));
        assert_eq!(log.blocks()[idx].content(), "child result");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_update_unknown_call_id() {
        let mut log = log_with_system();
        assert!(!log.update_tool_block_result("missing", "x"));
    }

    #[test]
    fn test_context_refresh_replaces_blocks() {
        let mut log = log_with_system();
        log.add_context_block("project", "old summary");
        log.add_user_block("user", "task");

        assert_eq!(log.remove_blocks_by_type(BlockType::Context), 1);
        log.add_context_block("project", "new summary");

        let contexts: Vec<&ContextBlock> = log
            .blocks()
            .iter()
            .filter(|b| b.block_type == BlockType::Context)
            .collect();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].content(), "new summary");
    }

    #[test]
    fn test_stats_and_summary() {
        let mut log = log_with_system();
        log.add_user_block("user", "hello");
        log.add_pending_tool_block(&ToolCall::new("c1", "delegate_task", "{}"), None);

        let stats = log.stats();
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.pending_tool_blocks, 1);
        assert_eq!(stats.blocks_by_type.get(&BlockType::Tool), Some(&1));

        let summary = log.debug_summary();
        assert!(summary.starts_with("3 blocks"));
        assert!(summary.contains("[2] TOOL (pending)"));
    }
}
