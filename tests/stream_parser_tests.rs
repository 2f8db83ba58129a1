use talkshell::api::stream::{SseEvent, StreamParser};

#[test]
fn test_fragmented_events() {
    let mut parser = StreamParser::new();

    let chunk1 = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"cont";
    let events1 = parser.process(chunk1).expect("first chunk parse");
    assert_eq!(events1.len(), 0);

    let chunk2 = b"ent\":\"Hi\"}}]}\n\n";
    let events2 = parser.process(chunk2).expect("second chunk parse");
    assert_eq!(events2.len(), 1);

    match &events2[0] {
        SseEvent::Chunk(chunk) => {
            assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_parse_error_handling() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {invalid json}\n\ndata: [DONE]\n\n";
    let events = parser
        .process(chunk)
        .expect("error handling should not fail parser");
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SseEvent::Done));
}

#[test]
fn test_reasoning_and_tool_call_deltas_are_parsed() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"hmm\"}}]}\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"path\\\"\"}}]}}]}\n\n";
    let events = parser.process(chunk).expect("deltas should parse");
    assert_eq!(events.len(), 2);

    match &events[0] {
        SseEvent::Chunk(chunk) => {
            assert_eq!(
                chunk.choices[0].delta.reasoning_content.as_deref(),
                Some("hmm")
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        SseEvent::Chunk(chunk) => {
            let call = &chunk.choices[0].delta.tool_calls[0];
            assert_eq!(call.id.as_deref(), Some("call_1"));
            let function = call.function.as_ref().expect("function delta");
            assert_eq!(function.name.as_deref(), Some("read_file"));
            assert_eq!(function.arguments.as_deref(), Some("{\"path\""));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_null_tool_calls_and_usage_chunk_are_accepted() {
    let mut parser = StreamParser::new();

    let chunk = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":null,\"tool_calls\":null},\"finish_reason\":\"stop\"}]}\n\ndata: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":5,\"total_tokens\":8}}\n\n";
    let events = parser.process(chunk).expect("chunks should parse");
    assert_eq!(events.len(), 2);

    match &events[0] {
        SseEvent::Chunk(chunk) => {
            assert!(chunk.choices[0].delta.tool_calls.is_empty());
            assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        SseEvent::Chunk(chunk) => assert!(chunk.usage.is_some()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_unterminated_event_stays_buffered() {
    let mut parser = StreamParser::new();

    let events = parser
        .process(b"data: [DONE]")
        .expect("partial event should not fail");
    assert!(events.is_empty());
    assert_eq!(parser.flush(), "data: [DONE]");
    assert_eq!(parser.flush(), "");
}

#[test]
fn test_multibyte_character_split_across_chunks() {
    let mut parser = StreamParser::new();

    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"你好\"}}]}\n\n";
    let bytes = body.as_bytes();
    let split = body.find('你').expect("marker present") + 1;

    let events1 = parser.process(&bytes[..split]).expect("first half");
    assert!(events1.is_empty());
    let events2 = parser.process(&bytes[split..]).expect("second half");
    assert_eq!(events2.len(), 1);

    match &events2[0] {
        SseEvent::Chunk(chunk) => {
            assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("你好"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
