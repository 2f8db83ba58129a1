use clap::Parser;
use talkshell::config::{Cli, Config, DEFAULT_BASE_URL, DEFAULT_MODEL};
use talkshell::input::InputMode;

fn config_from(args: &[&str]) -> Config {
    let cli = Cli::try_parse_from(std::iter::once("talkshell").chain(args.iter().copied()))
        .expect("arguments should parse");
    Config::from_cli(cli).expect("config should build")
}

#[test]
fn test_defaults_are_valid() {
    let config = config_from(&[]);
    assert_eq!(config.model, DEFAULT_MODEL);
    assert_eq!(config.input_mode, InputMode::Text);
    assert!(config.log_enabled);
    assert!(config.log_filename.ends_with(".md"));
    assert!(config.validate().is_ok());
    if std::env::var_os("TALKSHELL_BASE_URL").is_none() {
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}

#[test]
fn test_invalid_base_url_fails_validation() {
    let config = config_from(&["--base-url", "api.deepseek.com"]);
    let error = config.validate().expect_err("scheme is required");
    assert!(error.to_string().contains("Invalid base URL"));
}

#[test]
fn test_log_filename_must_not_contain_directories() {
    let config = config_from(&["--log-filename", "logs/chat.md"]);
    assert!(config.validate().is_err());

    let config = config_from(&["--log-dir", "/tmp/talkshell-logs", "--log-filename", "chat.md"]);
    assert!(config.validate().is_ok());
    assert!(config.log_path().ends_with("talkshell-logs/chat.md"));
}

#[test]
fn test_empty_model_is_rejected() {
    let config = config_from(&["--model", "  "]);
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_flag_is_a_parse_error() {
    assert!(Cli::try_parse_from(["talkshell", "--temperature", "2"]).is_err());
}
