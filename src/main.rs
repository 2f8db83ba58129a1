use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use talkshell::api::HttpClientFactory;
use talkshell::config::Config;
use talkshell::input::InputClient;
use talkshell::profiles::AssistantCatalog;
use talkshell::session::options::SessionConfig;
use talkshell::session::{Session, SessionServices};
use talkshell::tokenizer::CharRatioTokenizer;
use talkshell::tools::{DockerTaskbox, HttpWebAccess};
use talkshell::transcript::MarkdownLog;
use talkshell::ui::Console;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    init_tracing(&config);

    let console = Console::new(config.silent);
    let profiles = match AssistantCatalog::load(&config.ai_config) {
        Ok(profiles) => profiles,
        Err(error) => {
            console.warn(format!("{error:#}; using the built-in assistant list"));
            AssistantCatalog::builtin()
        }
    };

    let services = SessionServices {
        client_factory: Arc::new(HttpClientFactory),
        tokenizer: Arc::new(CharRatioTokenizer),
        logger: Box::new(MarkdownLog::new(config.log_path(), config.log_enabled)),
        taskbox: Arc::new(DockerTaskbox::new()),
        web: Arc::new(HttpWebAccess::new()?),
        profiles,
    };
    let options = SessionConfig::with_defaults(&config.base_url, &config.api_key_name, &config.model);
    let mut session = Session::new(
        options,
        InputClient::new(config.input_mode),
        services,
        console.clone(),
        config.working_dir.clone(),
    );

    if let Some(sandbox) = &config.sandbox {
        session.set_sandbox(Some(&sandbox.to_string_lossy()))?;
    }
    if let Some(selector) = &config.use_ai {
        session.use_ai(selector, None)?;
    }

    console.notice(format!(
        "talkshell {} | model {} | {}help for commands",
        env!("CARGO_PKG_VERSION"),
        session.options().model(),
        session.prefix()
    ));
    if config.log_enabled {
        console.notice(format!("logging to {}", config.log_path().display()));
    }

    session.run().await
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_env("TALKSHELL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let log_file = std::fs::create_dir_all(&config.log_dir).and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_dir.join("talkshell.log"))
    });

    match log_file {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
