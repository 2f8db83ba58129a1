use super::accumulator::{StreamAccumulator, StreamPiece};
use super::assemble::{assemble_messages, build_model_request, ModelRequest};
use super::budget::{cache_tokens, estimate_tokens};
use super::history::{ResponseEntry, Round};
use super::tools::{
    resolve_max_tool_rounds, resolve_tool_timeout, run_tool_call, skipped_tool_call,
};
use super::Session;
use crate::api::stream::{SseEvent, StreamParser};
use crate::api::{ModelApi, ProviderError};
use crate::tools::ToolDefinition;
use crate::types::{ChatRequest, Message, ToolCall};
use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

const TOOL_ROUND_LIMIT_NOTICE: &str = "tool round limit reached";
const EXIT_SKIP_REASON: &str = "session is exiting";

impl Session {
    /// Opens a round for `text`, runs model turns until a reply carries no
    /// tool calls (or is an error), then closes the round.
    pub async fn submit_request(&mut self, text: String) -> Result<()> {
        let mut request = Message::user(text);
        request.files = std::mem::take(&mut self.pending_files);
        cache_tokens(&mut request, self.tokenizer.as_ref());

        self.log_system_prompt();
        self.log_message(&request);
        self.history.begin_round(request)?;

        let tokens = estimate_tokens(
            self.history
                .rounds()
                .iter()
                .flat_map(Round::messages)
                .chain(self.history.current().messages()),
            self.tokenizer.as_ref(),
        );
        if let Some(warning) = self.budget().submission_warning(tokens) {
            self.console.warn(warning.to_string());
        }

        let max_tool_rounds = resolve_max_tool_rounds();
        let tool_timeout = resolve_tool_timeout();
        let mut tool_rounds = 0usize;

        loop {
            let reply = self.generate().await;
            let calls = if reply.is_error() {
                Vec::new()
            } else {
                reply.tool_calls.clone()
            };
            self.history.push_response(ResponseEntry::Message(reply))?;

            if calls.is_empty() {
                break;
            }
            if self.exit_requested() {
                tracing::info!("exit requested; skipping pending tool calls");
                self.skip_tool_calls(&calls, EXIT_SKIP_REASON)?;
                break;
            }
            if tool_rounds >= max_tool_rounds {
                self.console.warn(format!(
                    "{TOOL_ROUND_LIMIT_NOTICE} ({max_tool_rounds}); remaining tool calls skipped"
                ));
                self.skip_tool_calls(&calls, TOOL_ROUND_LIMIT_NOTICE)?;
                break;
            }
            tool_rounds += 1;

            let mut batch = Vec::with_capacity(calls.len());
            for call in &calls {
                self.console.tool_call(&call.name, &call.arguments);
                let set = self.tools.resolve(&call.name);
                let mut result = run_tool_call(set, call, tool_timeout).await;
                self.console.tool_result(&result.content);
                cache_tokens(&mut result, self.tokenizer.as_ref());
                self.log_message(&result);
                batch.push(result);
            }
            batch.extend(self.take_concurrent_requests());
            self.history.push_response(ResponseEntry::Batch(batch))?;

            if self.exit_requested() {
                tracing::info!("exit requested during tool calls; not calling the model again");
                break;
            }
        }

        self.history.close_round();
        Ok(())
    }

    /// Answers every pending call with a skip notice so later requests stay
    /// well-formed.
    fn skip_tool_calls(&mut self, calls: &[ToolCall], reason: &str) -> Result<()> {
        let mut batch = Vec::with_capacity(calls.len());
        for call in calls {
            let mut result = skipped_tool_call(call, reason);
            cache_tokens(&mut result, self.tokenizer.as_ref());
            self.log_message(&result);
            batch.push(result);
        }
        self.history.push_response(ResponseEntry::Batch(batch))
    }

    /// User requests typed while tools ran; they join the tool-result batch.
    fn take_concurrent_requests(&mut self) -> Vec<Message> {
        let mut requests = Vec::new();
        while let Some(line) = self.input.try_fetch_line() {
            let Some(text) = self.resolve_line(&line) else {
                continue;
            };
            let mut message = Message::user(text);
            message.files = std::mem::take(&mut self.pending_files);
            cache_tokens(&mut message, self.tokenizer.as_ref());
            self.log_message(&message);
            requests.push(message);
        }
        requests
    }

    fn log_system_prompt(&mut self) {
        if self.system_logged {
            return;
        }
        self.system_logged = true;
        let system = Message::system(self.options.system_prompt());
        self.log_message(&system);
    }

    fn client(&mut self) -> Result<Arc<dyn ModelApi>> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }
        let client = self
            .client_factory
            .connect(self.options.base_url(), self.options.api_key_name())?;
        tracing::debug!(base_url = self.options.base_url(), "model client created");
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }

    /// One model turn. Failures come back as error-tagged assistant messages.
    async fn generate(&mut self) -> Message {
        let started = Instant::now();
        let mut message = match self.call_model().await {
            Ok(mut message) => {
                message.elapsed_secs = Some(started.elapsed().as_secs_f64());
                message
            }
            Err(error) => {
                tracing::warn!(kind = error.kind.type_name(), error = %error.message, "generation failed");
                self.console.error(error.to_string());
                error.to_message()
            }
        };
        message.model = Some(self.options.model().to_string());
        message.base_url = Some(self.options.base_url().to_string());
        cache_tokens(&mut message, self.tokenizer.as_ref());
        self.log_message(&message);
        message
    }

    async fn call_model(&mut self) -> Result<Message, ProviderError> {
        let client = self
            .client()
            .map_err(|error| ProviderError::unknown(format!("{error:#}")))?;

        let outgoing = assemble_messages(&self.history, &self.options);
        let tokens = estimate_tokens(&outgoing, self.tokenizer.as_ref());
        if let Some(warning) = self.budget().precall_warning(tokens) {
            self.console.warn(warning.to_string());
        }

        let tools = self
            .tools
            .active_definitions()
            .iter()
            .map(ToolDefinition::to_wire)
            .collect();
        match build_model_request(&self.history, &mut self.options, tools) {
            ModelRequest::Chat(request) => {
                self.stream_reply(client.as_ref(), &request, StreamAccumulator::new())
                    .await
            }
            ModelRequest::Prefix { request, seed } => {
                self.console.render(&StreamPiece::Content(seed.clone()));
                self.stream_reply(client.as_ref(), &request, StreamAccumulator::with_content(seed))
                    .await
            }
            ModelRequest::Fim(request) => {
                let text = client.complete(&request).await?;
                self.console.output(&text);
                Ok(Message::assistant(text))
            }
        }
    }

    async fn stream_reply(
        &self,
        client: &dyn ModelApi,
        request: &ChatRequest,
        mut accumulator: StreamAccumulator,
    ) -> Result<Message, ProviderError> {
        let mut stream = client.chat_stream(request).await?;
        let mut parser = StreamParser::new();

        'stream: while let Some(item) = stream.next().await {
            let bytes = item?;
            let events = parser.process(&bytes).map_err(ProviderError::unknown)?;
            for event in events {
                match event {
                    SseEvent::Chunk(chunk) => {
                        for piece in accumulator.push_chunk(&chunk) {
                            self.console.render(&piece);
                        }
                    }
                    SseEvent::Done => break 'stream,
                }
            }
        }

        for piece in accumulator.finish() {
            self.console.render(&piece);
        }
        self.console.end_response();
        if let Some(reason) = accumulator.finish_reason() {
            tracing::debug!(finish_reason = reason, "stream finished");
        }
        Ok(accumulator.into_message())
    }
}
