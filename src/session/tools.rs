use crate::tools::ToolSet;
use crate::types::{Message, ToolCall};
use crate::util::env_override_u64;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_TOOL_ROUNDS: u64 = 24;

pub const TOOL_ERROR_PREFIX: &str = "[tool error] ";

pub(super) fn resolve_tool_timeout() -> Duration {
    Duration::from_secs(env_override_u64(
        "TALKSHELL_TOOL_TIMEOUT_SECS",
        DEFAULT_TOOL_TIMEOUT_SECS,
        2,
        600,
    ))
}

/// Upper bound on model calls answering tool results within one request.
pub(super) fn resolve_max_tool_rounds() -> usize {
    env_override_u64("TALKSHELL_MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS, 1, 256) as usize
}

/// Streamed arguments are a JSON object; an empty string means no arguments.
pub(super) fn parse_tool_arguments(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw).context("tool arguments are not valid JSON")?;
    if !value.is_object() {
        return Err(anyhow!("tool arguments must be a JSON object"));
    }
    Ok(value)
}

pub(super) async fn execute_tool_with_timeout(
    set: Arc<dyn ToolSet>,
    name: &str,
    input: Value,
    tool_timeout: Duration,
) -> Result<String> {
    let tool_name = name.to_string();
    let task_name = tool_name.clone();
    let mut task = tokio::task::spawn_blocking(move || set.call(&task_name, &input));

    match tokio::time::timeout(tool_timeout, &mut task).await {
        Ok(join_result) => match join_result {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!(
                "tool execution task failed for {tool_name}: {join_error}"
            )),
        },
        Err(_) => {
            task.abort();
            Err(anyhow!(
                "tool execution timed out after {}s for {tool_name}",
                tool_timeout.as_secs()
            ))
        }
    }
}

/// Runs one requested call and wraps the outcome as a tool message. Failures
/// are reported to the model rather than aborting the round.
pub(super) async fn run_tool_call(
    set: Option<Arc<dyn ToolSet>>,
    call: &ToolCall,
    tool_timeout: Duration,
) -> Message {
    let outcome = match (set, parse_tool_arguments(&call.arguments)) {
        (None, _) => Err(anyhow!("function '{}' is not available", call.name)),
        (Some(_), Err(error)) => Err(error),
        (Some(set), Ok(input)) => {
            execute_tool_with_timeout(set, &call.name, input, tool_timeout).await
        }
    };
    let content = match outcome {
        Ok(output) => output,
        Err(error) => {
            tracing::warn!(tool = %call.name, error = %format!("{error:#}"), "tool call failed");
            format!("{TOOL_ERROR_PREFIX}{error:#}")
        }
    };
    Message::tool(&call.id, &call.name, content)
}

/// Tool message answering a call that will not run, so the stored reply never
/// carries an unanswered call id.
pub(super) fn skipped_tool_call(call: &ToolCall, reason: &str) -> Message {
    Message::tool(
        &call.id,
        &call.name,
        format!("{TOOL_ERROR_PREFIX}skipped: {reason}"),
    )
}
