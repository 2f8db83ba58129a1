//! The session object: owns configuration, history, input and collaborators,
//! and drives the dispatch/generation loop on one task.

pub mod accumulator;
pub mod assemble;
pub mod attachments;
pub mod budget;
pub mod history;
mod orchestrator;
pub mod options;
mod tools;


use crate::api::{ClientFactory, ModelApi};
use crate::commands::{
    builtin, execute, parse_signature, BlockEvent, BlockStack, CommandPrefix, CommandRegistry,
    Invocation, Resolution,
};
use crate::input::InputClient;
use crate::profiles::AssistantCatalog;
use crate::tokenizer::Tokenizer;
use crate::tools::{FileTools, ShellTools, Taskbox, ToolRegistry, WebAccess};
use crate::transcript::ConversationLogger;
use crate::types::{AttachedFile, Message};
use crate::ui::Console;
use crate::util::expand_home;
use anyhow::{anyhow, bail, Context, Result};
use budget::{TokenBudget, DEFAULT_CONTEXT_WINDOW};
use history::ConversationHistory;
use options::{canonical_option_name, SessionConfig};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// External collaborators the session talks to.
pub struct SessionServices {
    pub client_factory: Arc<dyn ClientFactory>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub logger: Box<dyn ConversationLogger>,
    pub taskbox: Arc<dyn Taskbox>,
    pub web: Arc<dyn WebAccess>,
    pub profiles: AssistantCatalog,
}

/// The assistant profile currently bound through `use ai`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProfile {
    pub name: String,
    pub model: String,
    pub base_url: String,
    pub api_key_name: String,
    pub context_window: Option<usize>,
}

/// Web work queued by a command and run by the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    Search(String),
    Fetch(String),
    Download(String),
}

pub struct Session {
    pub(crate) options: SessionConfig,
    pub(crate) history: ConversationHistory,
    prefix: CommandPrefix,
    blocks: BlockStack,
    registry: Arc<CommandRegistry<Session>>,
    input: InputClient,
    pub(crate) pending_files: Vec<AttachedFile>,
    client_factory: Arc<dyn ClientFactory>,
    client: Option<Arc<dyn ModelApi>>,
    tokenizer: Arc<dyn Tokenizer>,
    pub(crate) logger: Box<dyn ConversationLogger>,
    pub(crate) tools: ToolRegistry,
    pub(crate) taskbox: Arc<dyn Taskbox>,
    web: Arc<dyn WebAccess>,
    pub(crate) profiles: AssistantCatalog,
    active_profile: Option<ActiveProfile>,
    deferred: VecDeque<DeferredAction>,
    working_dir: PathBuf,
    sandbox: Option<PathBuf>,
    pub(crate) console: Console,
    exit_requested: bool,
    system_logged: bool,
}

impl Session {
    pub fn new(
        options: SessionConfig,
        input: InputClient,
        services: SessionServices,
        console: Console,
        working_dir: PathBuf,
    ) -> Self {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FileTools::new(working_dir.clone())));
        tools.register(Arc::new(ShellTools::new(Arc::clone(&services.taskbox))));

        Self {
            options,
            history: ConversationHistory::new(),
            prefix: CommandPrefix::default(),
            blocks: BlockStack::new(),
            registry: Arc::new(builtin::registry()),
            input,
            pending_files: Vec::new(),
            client_factory: services.client_factory,
            client: None,
            tokenizer: services.tokenizer,
            logger: services.logger,
            tools,
            taskbox: services.taskbox,
            web: services.web,
            profiles: services.profiles,
            active_profile: None,
            deferred: VecDeque::new(),
            working_dir,
            sandbox: None,
            console,
            exit_requested: false,
            system_logged: false,
        }
    }

    pub fn options(&self) -> &SessionConfig {
        &self.options
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn input(&self) -> &InputClient {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputClient {
        &mut self.input
    }

    pub fn prefix(&self) -> char {
        self.prefix.get()
    }

    pub fn active_profile(&self) -> Option<&ActiveProfile> {
        self.active_profile.as_ref()
    }

    pub fn pending_files(&self) -> &[AttachedFile] {
        &self.pending_files
    }

    pub fn deferred_actions(&self) -> impl Iterator<Item = &DeferredAction> {
        self.deferred.iter()
    }

    pub fn is_capturing_block(&self) -> bool {
        self.blocks.is_capturing()
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub(crate) fn request_exit(&mut self) {
        self.exit_requested = true;
        self.input.stop();
    }

    pub(crate) fn registry(&self) -> Arc<CommandRegistry<Session>> {
        Arc::clone(&self.registry)
    }

    pub(crate) fn defer(&mut self, action: DeferredAction) {
        self.deferred.push_back(action);
    }

    pub(crate) fn budget(&self) -> TokenBudget {
        TokenBudget::new(
            self.active_profile
                .as_ref()
                .and_then(|profile| profile.context_window)
                .unwrap_or(DEFAULT_CONTEXT_WINDOW),
        )
    }

    /// Replaces history from a loaded log, recounting tokens the current
    /// tokenizer did not produce.
    pub(crate) fn replace_history(&mut self, messages: Vec<Message>) -> usize {
        let rounds = self.history.replace_with(messages);
        for message in self.history.messages_mut() {
            budget::cache_tokens(message, self.tokenizer.as_ref());
        }
        rounds
    }

    /// Consumer loop: polls input, resolves it, and runs generations until the
    /// input ends or `exit` is issued.
    pub async fn run(&mut self) -> Result<()> {
        self.input.start()?;
        tracing::info!(model = self.options.model(), "session started");
        loop {
            if self.exit_requested {
                break;
            }
            match self.input.fetch_line(POLL_INTERVAL).await {
                Some(line) => self.handle_line(&line).await,
                None if self.input.is_stopped() && self.input.is_drained() => break,
                None => {}
            }
        }

        let abandoned = self.blocks.abandon();
        if abandoned > 0 {
            self.console
                .warn(format!("input ended inside {abandoned} open block(s); content discarded"));
        }
        tracing::info!(rounds = self.history.len(), "session finished");
        Ok(())
    }

    /// Processes one raw input unit end to end.
    pub async fn handle_line(&mut self, line: &str) {
        if let Some(request) = self.resolve_line(line) {
            if let Err(error) = self.submit_request(request).await {
                self.console.error(format!("{error:#}"));
                self.history.close_round();
            }
        }
        self.run_deferred().await;
    }

    /// Runs one line through block capture and command dispatch. Returns the
    /// user request it resolves to, if any.
    pub fn resolve_line(&mut self, line: &str) -> Option<String> {
        let prefix = self.prefix.get();

        if self.blocks.is_capturing() {
            return match self.blocks.feed(line, prefix) {
                BlockEvent::Captured => None,
                BlockEvent::Closed { tag, content } => self.finish_block(&tag, content),
            };
        }

        if let Some(rest) = line.strip_prefix(prefix) {
            if rest.starts_with(prefix) {
                return Some(rest.to_string());
            }
            self.dispatch_command(rest);
            return None;
        }

        if let Some(signature) = parse_signature(line, prefix) {
            self.blocks.open("", signature);
            return None;
        }

        if line.trim().is_empty() {
            return None;
        }
        Some(line.to_string())
    }

    fn finish_block(&mut self, tag: &str, content: String) -> Option<String> {
        if tag.is_empty() {
            return (!content.trim().is_empty()).then_some(content);
        }
        let registry = self.registry();
        match registry.get(tag) {
            Some(spec) => {
                if let Err(error) = execute(self, spec, Invocation::Raw(&content)) {
                    self.console.error(format!("{error:#}"));
                }
            }
            None => self.console.error(format!("unknown command '{tag}'")),
        }
        None
    }

    /// Resolves and runs one command line (prefix already stripped). Returns
    /// whether it was accepted.
    pub fn dispatch_command(&mut self, line: &str) -> bool {
        let registry = self.registry();
        let prefix = self.prefix.get();
        match registry.resolve(line, prefix) {
            Resolution::ChangePrefix(c) => match self.prefix.set(c) {
                Ok(()) => {
                    self.console.notice(format!("command prefix is now '{c}'"));
                    true
                }
                Err(error) => {
                    self.console.error(format!("{error:#}"));
                    false
                }
            },
            Resolution::Invoke { spec, invocation } => {
                tracing::debug!(command = spec.name, "dispatching command");
                match execute(self, spec, invocation) {
                    Ok(()) => true,
                    Err(error) => {
                        self.console.error(format!("{}: {error:#}", spec.name));
                        false
                    }
                }
            }
            Resolution::OpenBlock { command, signature } => {
                self.blocks.open(command, signature);
                true
            }
            Resolution::Rejected(reason) => {
                self.console.error(reason);
                false
            }
            Resolution::Unknown(word) => {
                self.console
                    .error(format!("unknown command '{word}'; try {prefix}help"));
                false
            }
        }
    }

    pub(crate) fn log_message(&mut self, message: &Message) {
        if let Err(error) = self.logger.log(message) {
            tracing::warn!(error = %format!("{error:#}"), "failed to write conversation log");
            self.console.warn(format!("conversation log: {error:#}"));
        }
    }

    pub(crate) fn invalidate_client(&mut self) {
        self.client = None;
    }

    /// Sets an option, applying the side effects some options carry.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        let name = canonical_option_name(name);
        match name {
            "model" => self.set_model(value),
            "base_url" | "api_key_name" => {
                self.options.set(name, value)?;
                self.invalidate_client();
                if self.active_profile.take().is_some() {
                    self.console.notice("assistant profile unbound");
                }
                Ok(())
            }
            "sandbox" => self.set_sandbox(Some(value)),
            _ => {
                let stored = self.options.set(name, value)?.to_string();
                self.console.notice(format!("{name} = {stored}"));
                Ok(())
            }
        }
    }

    /// Removes an override. Returns whether one was present.
    pub fn reset_option(&mut self, name: &str) -> Result<bool> {
        let name = canonical_option_name(name);
        if name == "sandbox" {
            let had = self.sandbox.is_some();
            self.set_sandbox(None)?;
            return Ok(had);
        }
        let removed = self.options.reset(name)?;
        match name {
            "base_url" | "api_key_name" => {
                self.invalidate_client();
                self.active_profile = None;
            }
            "model" => self.refresh_profile_model(),
            _ => {}
        }
        Ok(removed)
    }

    fn set_model(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        let is_index = !value.is_empty() && value.chars().all(|c| c.is_ascii_digit());
        let Some(active) = self.active_profile.clone().filter(|_| is_index) else {
            self.options.set("model", value)?;
            self.refresh_profile_model();
            self.console.notice(format!("model = {}", self.options.model()));
            return Ok(());
        };

        let profile = self
            .profiles
            .resolve(&active.name)
            .map(|(_, profile)| profile)
            .ok_or_else(|| anyhow!("assistant '{}' is no longer configured", active.name))?;
        let entry = profile
            .resolve_model(value)
            .ok_or_else(|| anyhow!("assistant '{}' has no model #{value}", active.name))?
            .clone();
        self.options.set("model", &entry.name)?;
        self.refresh_profile_model();
        self.console
            .notice(format!("model #{value} resolved to {}", entry.name));
        Ok(())
    }

    /// Keeps the bound profile's model and context window in step with the
    /// `model` option.
    fn refresh_profile_model(&mut self) {
        let model = self.options.model().to_string();
        let Some(active) = self.active_profile.as_mut() else {
            return;
        };
        let window = self
            .profiles
            .resolve(&active.name)
            .and_then(|(_, profile)| profile.resolve_model(&model))
            .and_then(|entry| entry.context_window);
        active.model = model;
        active.context_window = window;
    }

    /// Binds an assistant profile and one of its models. Returns `false` when
    /// the same profile, model and endpoint are already bound.
    pub fn use_ai(&mut self, selector: &str, model_selector: Option<&str>) -> Result<bool> {
        let (_, profile) = self
            .profiles
            .resolve(selector)
            .ok_or_else(|| anyhow!("unknown assistant '{selector}'; see `list ai`"))?;
        let profile = profile.clone();
        let entry = match model_selector {
            Some(model) => profile.resolve_model(model).ok_or_else(|| {
                anyhow!("assistant '{}' has no model '{model}'", profile.name)
            })?,
            None => profile
                .models
                .first()
                .ok_or_else(|| anyhow!("assistant '{}' lists no models", profile.name))?,
        };

        let binding = ActiveProfile {
            name: profile.name.clone(),
            model: entry.name.clone(),
            base_url: profile.base_url.clone(),
            api_key_name: profile.api_key_name.clone(),
            context_window: entry.context_window,
        };
        let unchanged = self.active_profile.as_ref() == Some(&binding)
            && self.options.model() == binding.model
            && self.options.base_url() == binding.base_url
            && self.options.api_key_name() == binding.api_key_name;
        if unchanged {
            self.console
                .notice(format!("no change: already using {}/{}", binding.name, binding.model));
            return Ok(false);
        }

        let mut options = self.options.clone();
        options.set("base_url", &binding.base_url)?;
        options.set("api_key_name", &binding.api_key_name)?;
        options.set("model", &binding.model)?;
        for (key, value) in &profile.params {
            options
                .set_json(key, value)
                .with_context(|| format!("assistant '{}' parameter '{key}'", profile.name))?;
        }

        self.options = options;
        self.invalidate_client();
        self.console
            .notice(format!("using {} with model {}", binding.name, binding.model));
        tracing::info!(assistant = %binding.name, model = %binding.model, "assistant bound");
        self.active_profile = Some(binding);
        Ok(true)
    }

    pub fn sandbox_root(&self) -> &Path {
        self.sandbox.as_deref().unwrap_or(&self.working_dir)
    }

    /// Points file tools (and future taskbox starts) at a new root, or back
    /// at the working directory.
    pub fn set_sandbox(&mut self, path: Option<&str>) -> Result<()> {
        match path {
            Some(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    bail!("sandbox needs a directory path");
                }
                let candidate = expand_home(raw);
                let candidate = if candidate.is_absolute() {
                    candidate
                } else {
                    self.working_dir.join(candidate)
                };
                let root = std::fs::canonicalize(&candidate)
                    .with_context(|| format!("cannot resolve sandbox {}", candidate.display()))?;
                if !root.is_dir() {
                    bail!("sandbox {} is not a directory", root.display());
                }
                self.options.set("sandbox", &root.display().to_string())?;
                self.sandbox = Some(root);
            }
            None => {
                self.options.reset("sandbox")?;
                self.sandbox = None;
            }
        }
        let root = self.sandbox_root().to_path_buf();
        self.tools.register(Arc::new(FileTools::new(root.clone())));
        self.console
            .notice(format!("sandbox root: {}", root.display()));
        Ok(())
    }

    /// Runs web lookups queued by `search`, `goto` and `down`.
    pub async fn run_deferred(&mut self) {
        while let Some(action) = self.deferred.pop_front() {
            let web = Arc::clone(&self.web);
            match action {
                DeferredAction::Search(query) => match web.search(&query).await {
                    Ok(results) => {
                        self.console.output(&results);
                        self.attach_text(format!("search: {query}"), results);
                    }
                    Err(error) => self.console.error(format!("search failed: {error:#}")),
                },
                DeferredAction::Fetch(url) => match web.fetch(&url).await {
                    Ok(text) => {
                        self.console
                            .notice(format!("fetched {url} ({} chars)", text.chars().count()));
                        self.attach_text(url, text);
                    }
                    Err(error) => self.console.error(format!("goto failed: {error:#}")),
                },
                DeferredAction::Download(url) => {
                    let dir = self.sandbox_root().to_path_buf();
                    match web.download(&url, &dir).await {
                        Ok(path) => self.console.notice(format!("saved {}", path.display())),
                        Err(error) => self.console.error(format!("download failed: {error:#}")),
                    }
                }
            }
        }
    }

    /// Queues fetched text as an attachment of the next request.
    fn attach_text(&mut self, label: String, content: String) {
        self.pending_files.push(AttachedFile {
            abs_path: PathBuf::from(&label),
            path: label,
            encoding: "utf-8".to_string(),
            content,
        });
        self.console.notice(format!(
            "{} attachment(s) pending for the next request",
            self.pending_files.len()
        ));
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
