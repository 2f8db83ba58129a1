use super::history::{ConversationHistory, Round};
use super::options::{OptionValue, SessionConfig, TalkMode};
use crate::types::{ChatRequest, FimRequest, Message, Role};
use serde_json::Value;

const COMPLETION_MAX_TOKENS: i64 = 400;
const COMPLETION_TEMPERATURE: f64 = 0.2;
/// Rounds at the end of history that keep tool exchanges intact.
const FULL_DETAIL_ROUNDS: usize = 2;

/// Reasoning-class models accept only `max_tokens` among sampling parameters.
pub fn is_reasoner_model(model: &str) -> bool {
    let normalized = model.trim().to_ascii_lowercase();
    normalized.contains("reasoner") || normalized.starts_with("deepseek-r1")
}

/// The flat message list for the next model call: system prompt, filtered
/// history, then the current round in full.
pub fn assemble_messages(history: &ConversationHistory, config: &SessionConfig) -> Vec<Message> {
    let mut messages = vec![Message::system(config.system_prompt())];

    match config.talk_mode() {
        TalkMode::Chain => {
            let rounds = history.rounds();
            for (idx, round) in rounds.iter().enumerate() {
                let full_detail = idx + FULL_DETAIL_ROUNDS >= rounds.len();
                push_history_round(&mut messages, round, full_detail);
            }
        }
        TalkMode::Instant => {
            let flat: Vec<&Message> = history.rounds().iter().flat_map(Round::messages).collect();
            let run_start = flat
                .iter()
                .rposition(|message| message.role != Role::User)
                .map_or(0, |idx| idx + 1);
            messages.extend(flat[run_start..].iter().map(|message| filter_request(message)));
        }
    }

    messages.extend(history.current().messages().cloned());

    if messages
        .last()
        .is_some_and(|last| last.is_empty_assistant())
    {
        messages.pop();
    }
    messages
}

fn push_history_round(out: &mut Vec<Message>, round: &Round, full_detail: bool) {
    if let Some(request) = round.request() {
        out.push(filter_request(request));
    }
    for entry in round.responses() {
        for message in entry.messages() {
            if let Some(filtered) = filter_response(message, full_detail) {
                out.push(filtered);
            }
        }
    }
}

fn filter_request(request: &Message) -> Message {
    request.clone()
}

fn filter_response(message: &Message, full_detail: bool) -> Option<Message> {
    let mut message = message.clone();
    message.reasoning_content = None;
    if full_detail {
        return Some(message);
    }
    match message.role {
        Role::Tool => None,
        Role::Assistant => {
            message.tool_calls.clear();
            (!message.content.trim().is_empty()).then_some(message)
        }
        _ => Some(message),
    }
}

/// Sampling parameters taken from the session, restricted per model family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub max_tokens: Option<i64>,
    pub logprobs: Option<i64>,
}

impl GenerationParams {
    pub fn from_config(config: &SessionConfig) -> Self {
        let params = Self {
            temperature: config.float("temperature"),
            top_p: config.float("top_p"),
            presence_penalty: config.float("presence_penalty"),
            frequency_penalty: config.float("frequency_penalty"),
            max_tokens: config.int("max_tokens"),
            logprobs: config.int("logprobs"),
        };
        if is_reasoner_model(config.model()) {
            Self {
                max_tokens: params.max_tokens,
                ..Self::default()
            }
        } else {
            params
        }
    }

    fn with_completion_defaults(mut self, reasoner: bool) -> Self {
        self.max_tokens.get_or_insert(COMPLETION_MAX_TOKENS);
        if !reasoner {
            self.temperature.get_or_insert(COMPLETION_TEMPERATURE);
        }
        self
    }

    fn apply(&self, request: &mut ChatRequest) {
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.presence_penalty = self.presence_penalty;
        request.frequency_penalty = self.frequency_penalty;
        request.max_tokens = self.max_tokens;
        if let Some(count) = self.logprobs {
            request.logprobs = Some(true);
            request.top_logprobs = (count > 0).then_some(count);
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelRequest {
    Chat(ChatRequest),
    /// Continuation of `seed`, an assistant message marked as prefix.
    Prefix { request: ChatRequest, seed: String },
    Fim(FimRequest),
}

/// Chooses between chat, prefix completion and fill-in-the-middle and builds
/// the request. A configured `suffix` is consumed by the FIM path.
pub fn build_model_request(
    history: &ConversationHistory,
    config: &mut SessionConfig,
    tools: Vec<Value>,
) -> ModelRequest {
    let model = config.model().to_string();
    let reasoner = is_reasoner_model(&model);
    let params = GenerationParams::from_config(config);

    let Some(complete_type) = config.text("complete_type").map(str::to_string) else {
        let messages = assemble_messages(history, config);
        let mut request = ChatRequest {
            model,
            messages: messages.iter().map(|m| m.to_wire(true)).collect(),
            stream: true,
            tools,
            ..ChatRequest::default()
        };
        params.apply(&mut request);
        return ModelRequest::Chat(request);
    };

    let params = params.with_completion_defaults(reasoner);
    let fence = format!("```{complete_type}\n");

    if let Some(OptionValue::Text(suffix)) = config.take("suffix") {
        let last_user = history.current().last_user_text().unwrap_or_default();
        return ModelRequest::Fim(FimRequest {
            model,
            prompt: format!("{fence}{last_user}"),
            suffix: Some(suffix),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: false,
        });
    }

    let seed = format!("{fence}{}", config.text("prefix").unwrap_or_default());
    let mut messages: Vec<Message> = assemble_messages(history, config)
        .into_iter()
        .filter(|message| message.role != Role::System)
        .collect();
    let mut anchor = Message::assistant(seed.clone());
    anchor.prefix = true;
    messages.push(anchor);

    let mut request = ChatRequest {
        model,
        messages: messages.iter().map(|m| m.to_wire(true)).collect(),
        stream: true,
        stop: Some(vec!["```".to_string()]),
        beta: true,
        ..ChatRequest::default()
    };
    params.apply(&mut request);
    ModelRequest::Prefix { request, seed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::ResponseEntry;
    use crate::types::ToolCall;

    fn closed_round(history: &mut ConversationHistory, request: &str, reply: Option<&str>) {
        history.begin_round(Message::user(request)).unwrap();
        if let Some(reply) = reply {
            history
                .push_response(ResponseEntry::Message(Message::assistant(reply)))
                .unwrap();
        }
        history.close_round();
    }

    fn contents(messages: &[Message]) -> Vec<(Role, String)> {
        messages
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[test]
    fn instant_mode_keeps_only_the_trailing_user_run() {
        let mut history = ConversationHistory::new();
        closed_round(&mut history, "user1", Some("asst1"));
        closed_round(&mut history, "user2", Some("asst2"));
        closed_round(&mut history, "user3", None);
        history.begin_round(Message::user("user4")).unwrap();

        let mut config = SessionConfig::default();
        config.set("prompt", "sys").unwrap();
        config.set("talk_mode", "instant").unwrap();

        assert_eq!(
            contents(&assemble_messages(&history, &config)),
            vec![
                (Role::System, "sys".to_string()),
                (Role::User, "user3".to_string()),
                (Role::User, "user4".to_string()),
            ]
        );
    }

    #[test]
    fn chain_mode_collapses_tool_exchanges_in_older_rounds() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("q1")).unwrap();
        let mut call = Message::assistant("");
        call.tool_calls.push(ToolCall {
            id: "c1".to_string(),
            name: "read_file".to_string(),
            arguments: "{}".to_string(),
        });
        call.reasoning_content = Some("plan".to_string());
        history.push_response(ResponseEntry::Message(call)).unwrap();
        history
            .push_response(ResponseEntry::Batch(vec![Message::tool(
                "c1",
                "read_file",
                "data",
            )]))
            .unwrap();
        history
            .push_response(ResponseEntry::Message(Message::assistant("a1")))
            .unwrap();
        history.close_round();
        closed_round(&mut history, "q2", Some("a2"));
        closed_round(&mut history, "q3", Some("a3"));
        history.begin_round(Message::user("q4")).unwrap();

        let mut config = SessionConfig::default();
        config.set("prompt", "sys").unwrap();
        let messages = assemble_messages(&history, &config);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
            ]
        );
        assert_eq!(messages[2].content, "a1");
        assert!(messages.iter().all(|m| m.reasoning_content.is_none()));
    }

    #[test]
    fn recent_rounds_keep_tool_messages_but_drop_reasoning() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("q1")).unwrap();
        let mut call = Message::assistant("");
        call.reasoning_content = Some("plan".to_string());
        call.tool_calls.push(ToolCall {
            id: "c1".to_string(),
            name: "read_file".to_string(),
            arguments: "{}".to_string(),
        });
        history.push_response(ResponseEntry::Message(call)).unwrap();
        history
            .push_response(ResponseEntry::Batch(vec![Message::tool("c1", "read_file", "x")]))
            .unwrap();
        history.close_round();

        let config = SessionConfig::default();
        let messages = assemble_messages(&history, &config);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_calls.len(), 1);
        assert!(messages[2].reasoning_content.is_none());
        assert_eq!(messages[3].role, Role::Tool);
    }

    #[test]
    fn trailing_empty_assistant_is_dropped() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("q")).unwrap();
        history
            .push_response(ResponseEntry::Message(Message::assistant("")))
            .unwrap();
        let messages = assemble_messages(&history, &SessionConfig::default());
        assert_eq!(messages.last().map(|m| m.role), Some(Role::User));
    }

    #[test]
    fn reasoner_models_only_get_max_tokens() {
        let mut config = SessionConfig::default();
        config.set("temperature", "0.9").unwrap();
        config.set("top_p", "0.5").unwrap();
        config.set("max_tokens", "100").unwrap();
        config.set("model", "deepseek-reasoner").unwrap();

        assert_eq!(
            GenerationParams::from_config(&config),
            GenerationParams {
                max_tokens: Some(100),
                ..GenerationParams::default()
            }
        );
    }

    #[test]
    fn chat_request_carries_parameters_and_logprobs() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("hello")).unwrap();
        let mut config = SessionConfig::default();
        config.set("temperature", "0.9").unwrap();
        config.set("logprobs", "3").unwrap();

        let ModelRequest::Chat(request) = build_model_request(&history, &mut config, Vec::new())
        else {
            panic!("expected chat request");
        };
        assert_eq!(request.temperature, Some(0.9));
        assert_eq!(request.logprobs, Some(true));
        assert_eq!(request.top_logprobs, Some(3));
        assert!(request.stream);
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn fim_consumes_suffix_and_applies_defaults() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("def add(a, b):")).unwrap();
        let mut config = SessionConfig::default();
        config.set("complete_type", "python").unwrap();
        config.set("suffix", "\n    return c").unwrap();

        let ModelRequest::Fim(request) = build_model_request(&history, &mut config, Vec::new())
        else {
            panic!("expected FIM request");
        };
        assert_eq!(request.prompt, "```python\ndef add(a, b):");
        assert_eq!(request.suffix.as_deref(), Some("\n    return c"));
        assert_eq!(request.max_tokens, Some(400));
        assert_eq!(request.temperature, Some(0.2));
        assert!(config.text("suffix").is_none());
    }

    #[test]
    fn prefix_completion_strips_system_and_anchors_on_fence() {
        let mut history = ConversationHistory::new();
        history.begin_round(Message::user("write a loop")).unwrap();
        let mut config = SessionConfig::default();
        config.set("complete_type", "rust").unwrap();
        config.set("prefix", "for i in").unwrap();
        config.set("temperature", "0.7").unwrap();

        let ModelRequest::Prefix { request, seed } =
            build_model_request(&history, &mut config, Vec::new())
        else {
            panic!("expected prefix completion");
        };
        assert_eq!(seed, "```rust\nfor i in");
        assert!(request.beta);
        assert_eq!(request.stop, Some(vec!["```".to_string()]));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(400));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0]["role"], "user");
        assert_eq!(request.messages[1]["prefix"], true);
        assert_eq!(request.messages[1]["content"], "```rust\nfor i in");
    }
}
