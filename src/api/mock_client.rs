use super::client::{ByteStream, ClientFactory, ModelApi};
use super::error::ProviderError;
use crate::types::{ChatRequest, FimRequest};
use anyhow::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub enum MockReply {
    Stream(Vec<String>),
    Completion(String),
    Fail(ProviderError),
}

/// Replays scripted replies and records every request it receives.
#[derive(Clone, Default)]
pub struct MockApiClient {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    pub chat_requests: Arc<Mutex<Vec<ChatRequest>>>,
    pub fim_requests: Arc<Mutex<Vec<FimRequest>>>,
}

impl MockApiClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    pub fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn chat_request_count(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn last_chat_request(&self) -> Option<ChatRequest> {
        self.chat_requests.lock().unwrap().last().cloned()
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.replies.lock().unwrap().pop_front()
    }
}

impl ModelApi for MockApiClient {
    fn chat_stream<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<ByteStream, ProviderError>> {
        self.chat_requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply();
        Box::pin(async move {
            match reply {
                Some(MockReply::Stream(chunks)) => {
                    let framed: Vec<Result<Bytes, ProviderError>> = chunks
                        .into_iter()
                        .map(|s| {
                            let framed = if s.ends_with("\n\n") {
                                s
                            } else {
                                format!("{s}\n\n")
                            };
                            Ok(Bytes::from(framed))
                        })
                        .collect();
                    let stream: ByteStream = Box::pin(stream::iter(framed));
                    Ok(stream)
                }
                Some(MockReply::Fail(error)) => Err(error),
                Some(MockReply::Completion(_)) | None => Err(ProviderError::unknown(
                    "MockApiClient: no stream reply configured",
                )),
            }
        })
    }

    fn complete<'a>(
        &'a self,
        request: &'a FimRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        self.fim_requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply();
        Box::pin(async move {
            match reply {
                Some(MockReply::Completion(text)) => Ok(text),
                Some(MockReply::Fail(error)) => Err(error),
                Some(MockReply::Stream(_)) | None => Err(ProviderError::unknown(
                    "MockApiClient: no completion reply configured",
                )),
            }
        })
    }
}

/// Hands out the same mock client and counts how often a client was built.
#[derive(Clone, Default)]
pub struct MockClientFactory {
    pub client: MockApiClient,
    pub connects: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockClientFactory {
    pub fn new(client: MockApiClient) -> Self {
        Self {
            client,
            connects: Arc::default(),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

impl ClientFactory for MockClientFactory {
    fn connect(&self, base_url: &str, api_key_name: &str) -> Result<Arc<dyn ModelApi>> {
        self.connects
            .lock()
            .unwrap()
            .push((base_url.to_string(), api_key_name.to_string()));
        Ok(Arc::new(self.client.clone()))
    }
}

pub fn text_chunk(text: &str) -> String {
    format!(
        "data: {}",
        json!({"choices":[{"index":0,"delta":{"content":text},"finish_reason":null}]})
    )
}

pub fn reasoning_chunk(text: &str) -> String {
    format!(
        "data: {}",
        json!({"choices":[{"index":0,"delta":{"reasoning_content":text},"finish_reason":null}]})
    )
}

pub fn tool_call_chunk(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> String {
    let mut function = serde_json::Map::new();
    if let Some(name) = name {
        function.insert("name".to_string(), json!(name));
    }
    function.insert("arguments".to_string(), json!(args));
    let mut call = serde_json::Map::new();
    call.insert("index".to_string(), json!(index));
    if let Some(id) = id {
        call.insert("id".to_string(), json!(id));
        call.insert("type".to_string(), json!("function"));
    }
    call.insert("function".to_string(), serde_json::Value::Object(function));
    format!(
        "data: {}",
        json!({"choices":[{"index":0,"delta":{"tool_calls":[call]},"finish_reason":null}]})
    )
}

pub fn done_chunk() -> String {
    "data: [DONE]".to_string()
}

pub fn plain_text_reply(text: &str) -> MockReply {
    MockReply::Stream(vec![text_chunk(text), done_chunk()])
}

pub fn single_tool_call_reply(id: &str, name: &str, args: &str) -> MockReply {
    MockReply::Stream(vec![
        tool_call_chunk(0, Some(id), Some(name), ""),
        tool_call_chunk(0, None, None, args),
        done_chunk(),
    ])
}
