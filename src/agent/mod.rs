//! Conversational agent.
//!
//! Each user turn runs an explicit state machine:
//!
//! ```text
//! Idle ──▶ AwaitingModelResponse ──▶ Idle            (FinalAnswer)
//!                 │    ▲
//!                 ▼    │
//!           ToolInvocation                           (ToolRequest)
//! ```
//!
//! The reasoning step returns a [`ModelStep`]: either a final answer or a
//! tool request. Tool requests are executed one at a time and their
//! results (or errors) appended to the session before the model is asked
//! again. No partial output is produced before the final answer.
//!
//! Session history lives in an explicit [`ChatSession`] passed to every
//! [`Agent::run_turn`] call; the agent itself holds no per-session state.
//! The system instruction is rebuilt each turn from the configured prompt
//! and, when routing is on, the [`prompt`] strategy matching the question.

pub mod gemini;
pub mod prompt;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::ModelError;
use crate::retry::{retry, RetryPolicy};
use crate::tools::{FunctionDeclaration, ToolRegistry};

/// Reply used when a turn exhausts its tool-call budget.
pub const CANNOT_ANSWER: &str =
    "I'm sorry, I couldn't find enough information in the knowledge base to answer that.";

/// One entry of a session's history.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    User(String),
    Model(String),
    ToolCall { name: String, arguments: Value },
    ToolResult { name: String, response: Value },
}

/// Position of a session in the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingModelResponse,
    ToolInvocation,
}

/// Conversation state for one process invocation.
#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    messages: Vec<Message>,
    state: AgentState,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            state: AgentState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Completed (user, agent) exchanges, in order.
    pub fn turns(&self) -> Vec<(&str, &str)> {
        let mut turns = Vec::new();
        let mut pending: Option<&str> = None;
        for m in &self.messages {
            match m {
                Message::User(t) => pending = Some(t),
                Message::Model(t) => {
                    if let Some(u) = pending.take() {
                        turns.push((u, t.as_str()));
                    }
                }
                _ => {}
            }
        }
        turns
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of one reasoning step.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStep {
    FinalAnswer(String),
    ToolRequest { name: String, arguments: Value },
}

/// Everything the reasoning backend sees for one step.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub history: &'a [Message],
    pub tools: &'a [FunctionDeclaration],
}

/// LLM backend capable of function calling.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    async fn step(&self, request: ModelRequest<'_>) -> Result<ModelStep, ModelError>;
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub tool_calls: usize,
    pub tool_errors: usize,
}

/// Orchestrates model steps and tool invocations.
pub struct Agent {
    model: Arc<dyn ReasoningModel>,
    tools: ToolRegistry,
    system_prompt: String,
    prompt_routing: bool,
    max_tool_calls: usize,
    retry: RetryPolicy,
}

impl Agent {
    pub fn new(model: Arc<dyn ReasoningModel>, tools: ToolRegistry, config: &AgentConfig) -> Self {
        Self {
            model,
            tools,
            system_prompt: config.system_prompt.clone(),
            prompt_routing: config.prompt_routing,
            max_tool_calls: config.max_tool_calls.max(1),
            retry: config.retry.policy(),
        }
    }

    /// Process one user turn.
    ///
    /// Tool failures are fed back to the model. A failing reasoning step
    /// ends the turn with an error and leaves the session as it was
    /// before the turn.
    pub async fn run_turn(&self, session: &mut ChatSession, user_text: &str) -> Result<Reply, ModelError> {
        let span = tracing::info_span!("turn", session = %session.id);
        self.turn(session, user_text).instrument(span).await
    }

    async fn turn(&self, session: &mut ChatSession, user_text: &str) -> Result<Reply, ModelError> {
        let mark = session.messages.len();
        session.messages.push(Message::User(user_text.to_string()));
        let system = self.system_instruction(user_text);

        let declarations = self.tools.declarations();
        let mut tool_calls = 0;
        let mut tool_errors = 0;

        loop {
            session.state = AgentState::AwaitingModelResponse;
            let step = match self.step(&system, &session.messages, &declarations).await {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!(error = %e, "reasoning step failed");
                    session.messages.truncate(mark);
                    session.state = AgentState::Idle;
                    return Err(e);
                }
            };

            match step {
                ModelStep::FinalAnswer(text) => {
                    session.messages.push(Message::Model(text.clone()));
                    session.state = AgentState::Idle;
                    tracing::info!(tool_calls, "turn complete");
                    return Ok(Reply {
                        text,
                        tool_calls,
                        tool_errors,
                    });
                }
                ModelStep::ToolRequest { name, arguments } => {
                    if tool_calls >= self.max_tool_calls {
                        tracing::warn!(max = self.max_tool_calls, "tool call budget exhausted");
                        session.messages.push(Message::Model(CANNOT_ANSWER.to_string()));
                        session.state = AgentState::Idle;
                        return Ok(Reply {
                            text: CANNOT_ANSWER.to_string(),
                            tool_calls,
                            tool_errors,
                        });
                    }

                    session.state = AgentState::ToolInvocation;
                    tracing::info!(tool = %name, args = %arguments, "tool invocation");
                    let response = match self.invoke(&name, arguments.clone()).await {
                        Ok(v) => v,
                        Err(message) => {
                            tool_errors += 1;
                            tracing::warn!(tool = %name, error = %message, "tool failed");
                            json!({ "error": message })
                        }
                    };
                    tool_calls += 1;
                    session.messages.push(Message::ToolCall {
                        name: name.clone(),
                        arguments,
                    });
                    session.messages.push(Message::ToolResult { name, response });
                }
            }
        }
    }

    /// System instruction for a turn starting with `user_text`.
    pub fn system_instruction(&self, user_text: &str) -> String {
        if !self.prompt_routing {
            tracing::info!("user turn");
            return self.system_prompt.clone();
        }
        let strategy = prompt::choose_strategy(user_text);
        tracing::info!(strategy = strategy.name, "user turn");
        strategy.system_instruction(&self.system_prompt)
    }

    async fn step(
        &self,
        system: &str,
        history: &[Message],
        declarations: &[FunctionDeclaration],
    ) -> Result<ModelStep, ModelError> {
        let request = ModelRequest {
            system,
            history,
            tools: declarations,
        };
        retry(
            &self.retry,
            |_| self.model.step(request),
            ModelError::is_retryable,
        )
        .await
        .result
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool '{}'", name))?;
        tool.execute(arguments).await.map_err(|e| format!("{:#}", e))
    }
}
