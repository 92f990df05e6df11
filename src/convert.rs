//! Pure translation between the OpenAI schema and provider dialects.
//!
//! Nothing here touches the network. Backend adapters compose these helpers
//! to build upstream request bodies and to map provider answers back.

use tracing::{debug, warn};

use crate::wire::deepseek::{self, ToolChoiceMode};
use crate::wire::ollama;
use crate::wire::openai::{
    Content, ContentPart, FunctionDefinition, Message, Role, Tool, ToolCall, ToolChoice, ToolType,
};

/// Separator placed between text parts when array content is flattened.
pub const PART_SEPARATOR: &str = "; ";

/// Collapse message content into the single string providers expect.
///
/// Text parts are joined with [`PART_SEPARATOR`]; non-text parts are dropped
/// with a warning. Missing content becomes the empty string.
pub fn flatten_content(content: Option<&Content>) -> String {
    match content {
        None => String::new(),
        Some(Content::Text(text)) => text.clone(),
        Some(Content::Parts(parts)) => {
            let mut texts = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    ContentPart::Text(text) => texts.push(text.as_str()),
                    ContentPart::Unsupported(kind) => {
                        warn!(part = %kind, "dropping non-text content part");
                    }
                }
            }
            texts.join(PART_SEPARATOR)
        }
    }
}

/// Roles the providers understand. The legacy `function` role becomes `tool`.
pub fn provider_role(role: Role) -> Role {
    match role {
        Role::Function => Role::Tool,
        other => other,
    }
}

/// Drop tool calls with an empty function name and pin the call type.
///
/// Returns `None` when nothing survives so the field is omitted on the wire.
pub fn keep_named_calls(calls: Option<&[ToolCall]>) -> Option<Vec<ToolCall>> {
    let kept: Vec<ToolCall> = calls?
        .iter()
        .filter(|call| !call.function.name.is_empty())
        .map(|call| ToolCall {
            kind: ToolType::Function,
            ..call.clone()
        })
        .collect();
    (!kept.is_empty()).then_some(kept)
}

/// OpenAI messages to the DeepSeek/OpenRouter dialect.
pub fn to_chat_messages(messages: &[Message]) -> Vec<deepseek::Message> {
    messages
        .iter()
        .map(|msg| {
            let tool_calls = match msg.role {
                Role::Assistant | Role::Function => keep_named_calls(msg.tool_calls.as_deref()),
                _ => None,
            };
            deepseek::Message {
                role: provider_role(msg.role),
                content: flatten_content(msg.content.as_ref()),
                tool_calls,
                tool_call_id: msg.tool_call_id.clone().filter(|id| !id.is_empty()),
                name: msg.name.clone().filter(|name| !name.is_empty()),
            }
        })
        .collect()
}

/// OpenAI messages to Ollama's `{role, content}` pairs. Tool metadata is dropped.
pub fn to_ollama_messages(messages: &[Message]) -> Vec<ollama::Message> {
    messages
        .iter()
        .map(|msg| ollama::Message {
            role: provider_role(msg.role),
            content: flatten_content(msg.content.as_ref()),
        })
        .collect()
}

/// Tool list to send upstream. `tools` wins over the legacy `functions` list.
pub fn provider_tools(
    tools: Option<&[Tool]>,
    functions: Option<&[FunctionDefinition]>,
) -> Option<Vec<Tool>> {
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        return Some(tools.to_vec());
    }
    let functions = functions.filter(|f| !f.is_empty())?;
    Some(
        functions
            .iter()
            .map(|function| Tool {
                kind: ToolType::Function,
                function: function.clone(),
            })
            .collect(),
    )
}

/// Narrow the caller's preference to what the provider accepts.
///
/// A forced function choice has no provider equivalent and degrades to `auto`.
pub fn narrow_tool_choice(choice: &ToolChoice) -> Option<ToolChoiceMode> {
    match choice {
        ToolChoice::Auto => Some(ToolChoiceMode::Auto),
        ToolChoice::None => Some(ToolChoiceMode::None),
        ToolChoice::Function(name) => {
            debug!(function = %name, "forced function choice degraded to auto");
            Some(ToolChoiceMode::Auto)
        }
        ToolChoice::NoPreference => None,
    }
}

/// Provider assistant message back to the OpenAI shape.
///
/// Content is always re-wrapped as a plain string, empty when the provider
/// sent `null`.
pub fn from_provider_message(msg: deepseek::ResponseMessage) -> Message {
    Message {
        role: msg.role,
        content: Some(Content::Text(msg.content.unwrap_or_default())),
        tool_calls: keep_named_calls(msg.tool_calls.as_deref()),
        tool_call_id: msg.tool_call_id,
        name: msg.name,
    }
}
