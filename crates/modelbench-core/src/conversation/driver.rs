//! The tool-calling loop shared by every tool-capable provider.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::domain::{ProviderError, TaskResult};
use crate::sandbox::ContainerRuntime;

use super::decode::apply_final_answer;
use super::session::ToolSession;
use super::turn::{ModelTurn, ToolCall, ToolChoice};

/// Request state of one provider conversation.
///
/// Each adapter owns its concrete request type; the loop only needs these
/// four operations on it.
#[async_trait]
pub trait Conversation: Send {
    /// Send the conversation so far and return the model's next turn.
    async fn send(&mut self, cancel: &CancellationToken) -> Result<ModelTurn, ProviderError>;

    /// Append the model's turn, including its tool-call records, to history.
    fn append_assistant_message(&mut self, turn: &ModelTurn);

    /// Append the result (or error text) of one tool call to history.
    fn append_tool_result(&mut self, call: &ToolCall, content: &str);

    fn set_tool_choice(&mut self, choice: ToolChoice);
}

/// Drive `conversation` until the model answers without calling tools.
///
/// Token usage and model time are accumulated into `result` on every turn.
/// Tool calls run in the order the model listed them. Recoverable tool
/// failures go back to the model as `Error: ...` content; any other tool
/// failure ends the run. Tool usage is copied into `result` on every exit.
#[instrument(skip_all, fields(tools = session.tool_definitions().len()))]
pub async fn run_conversation<C, R>(
    cancel: &CancellationToken,
    conversation: &mut C,
    session: &ToolSession<R>,
    structured: bool,
    result: &mut TaskResult,
) -> Result<(), ProviderError>
where
    C: Conversation + ?Sized,
    R: ContainerRuntime,
{
    let outcome = drive(cancel, conversation, session, structured, result).await;
    result.usage.tools = session.usage();
    outcome
}

async fn drive<C, R>(
    cancel: &CancellationToken,
    conversation: &mut C,
    session: &ToolSession<R>,
    structured: bool,
    result: &mut TaskResult,
) -> Result<(), ProviderError>
where
    C: Conversation + ?Sized,
    R: ContainerRuntime,
{
    if session.has_tools() {
        conversation.set_tool_choice(ToolChoice::Auto);
    }

    let mut turns = 0u32;
    loop {
        turns += 1;
        let started = Instant::now();
        let turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            turn = conversation.send(cancel) => turn?,
        };
        result.add_duration(started.elapsed());
        result.usage.add_tokens(turn.usage);

        if !turn.has_tool_calls() {
            debug!(turns, "model returned final answer");
            return apply_final_answer(result, &turn.content, structured);
        }

        conversation.append_assistant_message(&turn);
        for call in &turn.tool_calls {
            let content = match session.execute(cancel, call).await {
                Ok(output) => output,
                Err(_) if cancel.is_cancelled() => return Err(ProviderError::Cancelled),
                Err(err) if err.is_recoverable() => {
                    warn!(tool = %call.name, error = %err, "tool call failed, reporting to model");
                    format!("Error: {err}")
                }
                Err(err) => return Err(err.into()),
            };
            conversation.append_tool_result(call, &content);
        }

        if session.budgets_exhausted() {
            debug!("all tool budgets spent, requesting a final answer");
            conversation.set_tool_choice(ToolChoice::None);
        }
    }
}
