use std::path::PathBuf;
use talkshell::transcript::{
    load_transcript, parse_transcript, render_message, ConversationLogger, MarkdownLog,
};
use talkshell::types::{AttachedFile, Message, MessageKind, Role, ToolCall};
use tempfile::TempDir;

fn tool_turn() -> Vec<Message> {
    let mut user = Message::user("what is in notes.txt?");
    user.files.push(AttachedFile {
        path: "notes.txt".to_string(),
        abs_path: PathBuf::from("/work/notes.txt"),
        encoding: "utf-8".to_string(),
        content: "buy milk".to_string(),
    });

    let mut call = Message::assistant("");
    call.reasoning_content = Some("read the file first".to_string());
    call.tool_calls.push(ToolCall {
        id: "call_1".to_string(),
        name: "read_file".to_string(),
        arguments: "{\"path\":\"notes.txt\"}".to_string(),
    });
    call.model = Some("deepseek-chat".to_string());
    call.tokens = Some(12);

    let result = Message::tool("call_1", "read_file", "buy milk");
    let mut answer = Message::assistant("It says \"buy milk\".\n\nMulti-line.");
    answer.elapsed_secs = Some(1.25);

    vec![Message::system("be brief"), user, call, result, answer]
}

#[test]
fn test_rendered_log_parses_back_to_same_messages() {
    let messages = tool_turn();
    let text: String = messages.iter().map(render_message).collect();

    let parsed = parse_transcript(&text).expect("log should parse");
    let roles: Vec<Role> = parsed.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant
        ]
    );

    assert_eq!(parsed[1].files, messages[1].files);
    assert_eq!(parsed[2].tool_calls, messages[2].tool_calls);
    assert_eq!(
        parsed[2].reasoning_content.as_deref(),
        Some("read the file first")
    );
    assert_eq!(parsed[2].model.as_deref(), Some("deepseek-chat"));
    assert_eq!(parsed[2].tokens, Some(12));
    assert_eq!(parsed[3].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(parsed[3].content, "buy milk");
    assert_eq!(parsed[4].content, messages[4].content);
    assert_eq!(parsed[4].elapsed_secs, Some(1.25));
}

#[test]
fn test_error_kind_survives_the_log() {
    let message = Message::error(MessageKind::ApiError, "RateLimited", "slow down");
    let parsed = parse_transcript(&render_message(&message)).expect("parse");
    assert_eq!(parsed.len(), 1);
    assert!(parsed[0].is_error());
    assert_eq!(parsed[0].kind, MessageKind::ApiError);
}

#[test]
fn test_text_before_first_header_is_rejected() {
    assert!(parse_transcript("stray line\n**User:**\n\nhi\n").is_err());
}

#[test]
fn test_markdown_log_appends_and_respects_toggle() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("logs").join("chat.md");
    let mut log = MarkdownLog::new(path.clone(), true);

    log.log(&Message::user("first")).expect("log first");
    log.set_enabled(false);
    log.log(&Message::user("hidden")).expect("disabled log is a no-op");
    log.set_enabled(true);
    log.log(&Message::assistant("second")).expect("log second");

    let loaded = load_transcript(&path).expect("load");
    let contents: Vec<&str> = loaded.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert_eq!(log.location(), Some(path.as_path()));
}

#[test]
fn test_bodies_that_look_like_log_markup_round_trip() {
    let user = Message::user("explain this log line:\n**Assistant:**\n<think>\n<small>");
    let mut answer = Message::assistant("It is a header.\n<tool-calls>\n[]\n</tool-calls>");
    answer.timestamp = None;
    let result = Message::tool("call_1", "read_file", "</tool-result>\n<attachment path=\"x\">");

    let text: String = [&user, &answer, &result].into_iter().map(render_message).collect();
    let parsed = parse_transcript(&text).expect("escaped markup should parse");

    assert_eq!(parsed.len(), 3);
    assert_eq!(parsed[0].role, Role::User);
    assert_eq!(parsed[0].content, user.content);
    assert_eq!(parsed[1].content, answer.content);
    assert!(parsed[1].tool_calls.is_empty());
    assert_eq!(parsed[2].content, result.content);
}
