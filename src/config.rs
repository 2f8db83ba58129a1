use crate::input::InputMode;
use crate::util::{app_dir, expand_home};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_API_KEY_NAME: &str = "DEEPSEEK_API_KEY";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Parser)]
#[command(
    name = "talkshell",
    version,
    about = "Interactive terminal client for chat-completion APIs"
)]
pub struct Cli {
    /// Do not persist the conversation log
    #[arg(long = "no-log")]
    pub no_log: bool,

    /// Directory for conversation logs
    #[arg(short = 'l', long = "log-dir")]
    pub log_dir: Option<String>,

    /// File name of the conversation log inside the log directory
    #[arg(long = "log-filename")]
    pub log_filename: Option<String>,

    /// Read each input line as a JSON string (or {"content": ...} object)
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Read input as plain text lines (default)
    #[arg(long)]
    pub text: bool,

    #[arg(long = "base-url", env = "TALKSHELL_BASE_URL")]
    pub base_url: Option<String>,

    /// Name of the environment variable holding the API key
    #[arg(long = "api-key-name")]
    pub api_key_name: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    /// Suppress banners and informational notices
    #[arg(long)]
    pub silent: bool,

    /// Bind an assistant profile by name or index at startup
    #[arg(long = "use-ai")]
    pub use_ai: Option<String>,

    /// JSON file with assistant profiles
    #[arg(long = "ai-config")]
    pub ai_config: Option<String>,

    /// Root directory exposed to file tools and the taskbox
    #[arg(long)]
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_key_name: String,
    pub model: String,
    pub log_enabled: bool,
    pub log_dir: PathBuf,
    pub log_filename: String,
    pub input_mode: InputMode,
    pub silent: bool,
    pub use_ai: Option<String>,
    pub ai_config: PathBuf,
    pub sandbox: Option<PathBuf>,
    pub working_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let log_filename = cli.log_filename.unwrap_or_else(|| {
            format!("chat-{}.md", chrono::Local::now().format("%Y%m%d-%H%M%S"))
        });

        Ok(Self {
            base_url: cli
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_name: cli
                .api_key_name
                .unwrap_or_else(|| DEFAULT_API_KEY_NAME.to_string()),
            model: cli.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            log_enabled: !cli.no_log,
            log_dir: cli
                .log_dir
                .map(|dir| expand_home(&dir))
                .unwrap_or_else(|| app_dir().join("logs")),
            log_filename,
            input_mode: if cli.json {
                InputMode::Json
            } else {
                InputMode::Text
            },
            silent: cli.silent,
            use_ai: cli.use_ai,
            ai_config: cli
                .ai_config
                .map(|path| expand_home(&path))
                .unwrap_or_else(|| app_dir().join("assistants.json")),
            sandbox: cli.sandbox.map(|path| expand_home(&path)),
            working_dir: std::env::current_dir()?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            bail!(
                "Invalid base URL '{}': expected http:// or https:// URL",
                self.base_url
            );
        }

        if self.model.trim().is_empty() {
            bail!("Model name must not be empty");
        }

        if self.api_key_name.trim().is_empty() {
            bail!("API key variable name must not be empty");
        }

        if self.log_filename.contains('/') || self.log_filename.contains('\\') {
            bail!(
                "Invalid log filename '{}': use --log-dir for the directory",
                self.log_filename
            );
        }

        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("talkshell").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn json_and_text_modes_conflict() {
        let result = Cli::try_parse_from(["talkshell", "--json", "--text"]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_populate_config() {
        let config = Config::from_cli(parse(&[
            "--no-log",
            "-l",
            "/tmp/talk",
            "--log-filename",
            "a.md",
            "--json",
            "--base-url",
            "http://localhost:9000/v1",
            "--model",
            "deepseek-reasoner",
            "--use-ai",
            "1",
        ]))
        .unwrap();

        assert!(!config.log_enabled);
        assert_eq!(config.log_path(), PathBuf::from("/tmp/talk/a.md"));
        assert_eq!(config.input_mode, InputMode::Json);
        assert_eq!(config.base_url, "http://localhost:9000/v1");
        assert_eq!(config.model, "deepseek-reasoner");
        assert_eq!(config.use_ai.as_deref(), Some("1"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_http_base_url() {
        let mut config = Config::from_cli(parse(&[])).unwrap();
        config.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }
}
