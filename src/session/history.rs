use crate::types::{Message, Role};
use anyhow::{bail, Result};

/// One item appended to a round after its request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEntry {
    Message(Message),
    /// Tool results from one tool-call turn, plus any user input that arrived
    /// while the tools ran.
    Batch(Vec<Message>),
}

impl ResponseEntry {
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Message(message) => std::slice::from_ref(message),
            Self::Batch(messages) => messages,
        }
    }

    fn messages_mut(&mut self) -> &mut [Message] {
        match self {
            Self::Message(message) => std::slice::from_mut(message),
            Self::Batch(messages) => messages,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Round {
    request: Option<Message>,
    responses: Vec<ResponseEntry>,
}

impl Round {
    pub fn new(request: Message) -> Self {
        Self {
            request: Some(request),
            responses: Vec::new(),
        }
    }

    pub fn request(&self) -> Option<&Message> {
        self.request.as_ref()
    }

    pub fn responses(&self) -> &[ResponseEntry] {
        &self.responses
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_none() && self.responses.is_empty()
    }

    /// Request followed by every response message, batches flattened.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.request
            .iter()
            .chain(self.responses.iter().flat_map(ResponseEntry::messages))
    }

    pub fn messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.request.iter_mut().chain(
            self.responses
                .iter_mut()
                .flat_map(|entry| entry.messages_mut().iter_mut()),
        )
    }

    /// The most recent single (non-batch) response.
    pub fn last_reply(&self) -> Option<&Message> {
        self.responses.iter().rev().find_map(|entry| match entry {
            ResponseEntry::Message(message) => Some(message),
            ResponseEntry::Batch(_) => None,
        })
    }

    /// Text of the last user message in this round, including attachments.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages()
            .filter(|message| message.role == Role::User)
            .last()
            .map(Message::content_with_attachments)
    }
}

/// Closed rounds plus the round currently being built.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    rounds: Vec<Round>,
    current: Round,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn current(&self) -> &Round {
        &self.current
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty() && self.current.is_empty()
    }

    pub fn begin_round(&mut self, request: Message) -> Result<()> {
        if self.current.request.is_some() {
            bail!("a round is already in progress");
        }
        self.current = Round::new(request);
        Ok(())
    }

    pub fn push_response(&mut self, entry: ResponseEntry) -> Result<()> {
        if self.current.request.is_none() {
            bail!("no round in progress");
        }
        self.current.responses.push(entry);
        Ok(())
    }

    /// Moves the current round into history. A round without a request is
    /// discarded.
    pub fn close_round(&mut self) -> bool {
        let round = std::mem::take(&mut self.current);
        if round.request.is_none() {
            return false;
        }
        self.rounds.push(round);
        true
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
        self.current = Round::default();
    }

    /// Every message in history and the current round.
    pub fn messages_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.rounds
            .iter_mut()
            .chain(std::iter::once(&mut self.current))
            .flat_map(Round::messages_mut)
    }

    /// Replaces history with rounds regrouped from a flat message list.
    pub fn replace_with(&mut self, messages: Vec<Message>) -> usize {
        self.rounds = group_into_rounds(messages);
        self.current = Round::default();
        self.rounds.len()
    }
}

/// Each user message opens a round; following non-user messages become its
/// responses, consecutive tool messages sharing one batch. Messages before the
/// first user message are dropped.
pub fn group_into_rounds(messages: Vec<Message>) -> Vec<Round> {
    let mut rounds: Vec<Round> = Vec::new();
    for message in messages {
        if message.role == Role::User {
            rounds.push(Round::new(message));
            continue;
        }
        let Some(round) = rounds.last_mut() else {
            continue;
        };
        match (message.role, round.responses.last_mut()) {
            (Role::Tool, Some(ResponseEntry::Batch(batch))) => batch.push(message),
            (Role::Tool, _) => round.responses.push(ResponseEntry::Batch(vec![message])),
            _ => round.responses.push(ResponseEntry::Message(message)),
        }
    }
    rounds
}
