//! Task agent: a bounded reasoning / tool-execution loop.
//!
//! ```text
//!             requests actions               results appended
//!  Reasoning ─────────────────▶ ToolExec ──────────────────▶ Reasoning
//!      │                           │
//!      │ plain answer              │ cycle cap reached
//!      ▼                           ▼
//!    Done                   AgentLoopExceeded
//! ```
//!
//! Every reasoning step sends the system prompt, the caller's message, the
//! most recent messages of the conversation up to `history_cap` and the
//! registered actions. A tool request and its results are never split.
//! Each entry into `ToolExec` counts as one cycle; entering it with the
//! cap already spent ends the run with [`AgentLoopExceeded`].
//!
//! Unknown action names and failed actions do not end the run: the error
//! text goes back to the model as that call's tool result.

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;

use crate::chat::{ChatMessage, ChatRequest, ChatService, ToolCall};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentLoopExceeded};
use crate::prompts::{self, AgentPromptVars};
use crate::registry::ActionRegistry;
use crate::workspace::WorkspaceStore;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Reasoning,
    ToolExec(Vec<ToolCall>),
    Done(String),
}

/// The messages of one agent run, in order. Only ever appended to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(user_message)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The caller's message followed by the latest `cap - 1` messages.
    ///
    /// A cut that lands inside a run of tool results moves back to the tool
    /// request they answer, so the window can exceed `cap` by the size of
    /// that run.
    pub fn window(&self, cap: usize) -> Vec<ChatMessage> {
        let len = self.messages.len();
        if len <= cap.max(1) {
            return self.messages.clone();
        }

        let mut start = (len + 1).saturating_sub(cap).max(1);
        while start > 1
            && start < len
            && matches!(self.messages[start], ChatMessage::ToolResult { .. })
        {
            start -= 1;
        }

        let mut window = Vec::with_capacity(len - start + 1);
        window.push(self.messages[0].clone());
        window.extend_from_slice(&self.messages[start..]);
        window
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub answer: String,
    /// Tool-execution cycles used.
    pub cycles: usize,
    pub conversation: Conversation,
}

pub struct TaskAgent {
    chat: Arc<dyn ChatService>,
    store: Arc<dyn WorkspaceStore>,
    registry: Arc<ActionRegistry>,
    config: AgentConfig,
    tz: Tz,
}

impl TaskAgent {
    pub fn new(
        chat: Arc<dyn ChatService>,
        store: Arc<dyn WorkspaceStore>,
        registry: Arc<ActionRegistry>,
        config: AgentConfig,
    ) -> Result<Self> {
        let tz = config.tz()?;
        Ok(Self {
            chat,
            store,
            registry,
            config,
            tz,
        })
    }

    /// Handle one caller message until the model gives a final answer.
    pub async fn run(&self, message: &str) -> Result<AgentRun, AgentError> {
        let system = self.system_prompt()?;
        let tools = self.registry.tool_schemas();
        let mut conversation = Conversation::new(message);
        let mut cycles = 0;
        let mut state = AgentState::Reasoning;

        loop {
            state = match state {
                AgentState::Reasoning => {
                    let mut messages = Vec::with_capacity(self.config.history_cap + 1);
                    messages.push(ChatMessage::system(system.as_str()));
                    messages.extend(conversation.window(self.config.history_cap));

                    let request = ChatRequest::new(messages).with_tools(tools.clone());
                    let response = self.chat.complete(request).await?;

                    if response.requests_tools() {
                        tracing::debug!(calls = response.tool_calls.len(), "reasoning -> tool_exec");
                        conversation.push(ChatMessage::ToolRequest {
                            calls: response.tool_calls.clone(),
                        });
                        AgentState::ToolExec(response.tool_calls)
                    } else {
                        tracing::debug!("reasoning -> done");
                        AgentState::Done(response.into_text())
                    }
                }
                AgentState::ToolExec(calls) => {
                    if cycles >= self.config.max_cycles {
                        tracing::warn!(max_cycles = self.config.max_cycles, "agent cycle cap reached");
                        return Err(AgentLoopExceeded {
                            max_cycles: self.config.max_cycles,
                        }
                        .into());
                    }
                    cycles += 1;

                    for call in calls {
                        let result = self.execute(&call).await;
                        conversation.push(ChatMessage::tool_result(call.id, result));
                    }
                    tracing::debug!(cycle = cycles, "tool_exec -> reasoning");
                    AgentState::Reasoning
                }
                AgentState::Done(answer) => {
                    conversation.push(ChatMessage::assistant(answer.as_str()));
                    return Ok(AgentRun {
                        answer,
                        cycles,
                        conversation,
                    });
                }
            };
        }
    }

    /// Run one requested action, turning any failure into result text.
    async fn execute(&self, call: &ToolCall) -> String {
        let Some(action) = self.registry.get(&call.name) else {
            tracing::warn!(name = %call.name, "model requested an unknown action");
            return format!("Error: unknown tool '{}'", call.name);
        };

        match action.execute(&call.arguments, self.store.as_ref()).await {
            Ok(result) => {
                tracing::info!(action = %action.name, bound_id = %action.bound_id, "action executed");
                result
            }
            Err(e) => {
                tracing::warn!(action = %action.name, error = %e, "action failed");
                format!("Error: {}", e)
            }
        }
    }

    fn system_prompt(&self) -> Result<String, AgentError> {
        let now = Utc::now()
            .with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M %A")
            .to_string();
        prompts::agent_system(&AgentPromptVars {
            now: &now,
            timezone: self.tz.name(),
            default_status: &self.config.default_status,
            default_priority: &self.config.default_priority,
            priority_order: &self.config.priority_order,
        })
        .map_err(|e| AgentError::Prompt(e.to_string()))
    }
}
