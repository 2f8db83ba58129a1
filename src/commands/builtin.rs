//! The built-in command table.

use super::registry::{CommandRegistry, CommandSpec};
use crate::session::attachments::load_attachment;
use crate::session::options::option_spec;
use crate::session::{DeferredAction, Session};
use crate::tools::parse_web_url;
use crate::transcript::load_transcript;
use crate::util::expand_home;
use anyhow::{bail, Context, Result};
use std::process::Command;

#[rustfmt::skip]
pub fn registry() -> CommandRegistry<Session> {
    let mut registry = CommandRegistry::new();
    let commands = [
        CommandSpec::parsed("help", "help [command]", "show commands", (0, Some(1)), help),
        CommandSpec::parsed("exit", "exit", "end the session", (0, Some(0)), exit),
        CommandSpec::parsed("clear", "clear", "discard conversation history", (0, Some(0)), clear),
        CommandSpec::parsed("model", "model <name|index>", "select the model", (1, Some(1)), set_model),
        CommandSpec::parsed("-model", "-model", "reset the model", (0, Some(0)), reset_model),
        CommandSpec::parsed("temperature", "temperature <0..2>", "sampling temperature", (1, Some(1)), set_temperature),
        CommandSpec::parsed("-temperature", "-temperature", "reset temperature", (0, Some(0)), reset_temperature),
        CommandSpec::parsed("top_p", "top_p <0..1>", "nucleus sampling mass", (1, Some(1)), set_top_p),
        CommandSpec::parsed("-top_p", "-top_p", "reset top_p", (0, Some(0)), reset_top_p),
        CommandSpec::parsed("presence_penalty", "presence_penalty <-2..2>", "presence penalty", (1, Some(1)), set_presence_penalty),
        CommandSpec::parsed("-presence_penalty", "-presence_penalty", "reset presence penalty", (0, Some(0)), reset_presence_penalty),
        CommandSpec::parsed("frequency_penalty", "frequency_penalty <-2..2>", "frequency penalty", (1, Some(1)), set_frequency_penalty),
        CommandSpec::parsed("-frequency_penalty", "-frequency_penalty", "reset frequency penalty", (0, Some(0)), reset_frequency_penalty),
        CommandSpec::parsed("logprobs", "logprobs <0..20>", "return token log probabilities", (1, Some(1)), set_logprobs),
        CommandSpec::parsed("-logprobs", "-logprobs", "stop requesting log probabilities", (0, Some(0)), reset_logprobs),
        CommandSpec::parsed("max_tokens", "max_tokens <n>", "cap the reply length", (1, Some(1)), set_max_tokens),
        CommandSpec::parsed("-max_tokens", "-max_tokens", "remove the reply length cap", (0, Some(0)), reset_max_tokens),
        CommandSpec::parsed("talk_mode", "talk_mode <chain|instant>", "history assembly strategy", (1, Some(1)), set_talk_mode),
        CommandSpec::parsed("-talk_mode", "-talk_mode", "back to chain mode", (0, Some(0)), reset_talk_mode),
        CommandSpec::parsed("base_url", "base_url <url>", "provider endpoint", (1, Some(1)), set_base_url),
        CommandSpec::parsed("-base_url", "-base_url", "reset the provider endpoint", (0, Some(0)), reset_base_url),
        CommandSpec::parsed("api_key_name", "api_key_name <ENV_VAR>", "variable holding the API key", (1, Some(1)), set_api_key_name),
        CommandSpec::parsed("-api_key_name", "-api_key_name", "reset the API key variable", (0, Some(0)), reset_api_key_name),
        CommandSpec::raw("prompt", "prompt <text> | prompt<<EOF", "set the system prompt", set_prompt),
        CommandSpec::parsed("-prompt", "-prompt", "restore the default system prompt", (0, Some(0)), reset_prompt),
        CommandSpec::parsed("complete_type", "complete_type <lang>", "code completion mode", (1, Some(1)), set_complete_type),
        CommandSpec::parsed("-complete_type", "-complete_type", "back to chat mode", (0, Some(0)), reset_complete_type),
        CommandSpec::raw("prefix", "prefix <text> | prefix<<EOF", "completion prefix", set_prefix),
        CommandSpec::parsed("-prefix", "-prefix", "clear the completion prefix", (0, Some(0)), reset_prefix),
        CommandSpec::raw("suffix", "suffix <text> | suffix<<EOF", "fill-in-the-middle suffix", set_suffix),
        CommandSpec::parsed("-suffix", "-suffix", "clear the suffix", (0, Some(0)), reset_suffix),
        CommandSpec::parsed("file", "file <path>...", "attach files to the next request", (1, None), attach_files),
        CommandSpec::parsed("-file", "-file", "drop pending attachments", (0, Some(0)), clear_files),
        CommandSpec::parsed("sandbox", "sandbox <dir>", "root for file tools and the taskbox", (1, None), set_sandbox),
        CommandSpec::parsed("-sandbox", "-sandbox", "use the working directory again", (0, Some(0)), reset_sandbox),
        CommandSpec::parsed("load", "load <log.md>", "replace history from a conversation log", (1, None), load),
        CommandSpec::parsed("list", "list ai|tool", "list assistants or tool sets", (1, Some(1)), list),
        CommandSpec::parsed("use", "use ai <name|idx> [model <name|idx>] | use tool <spec>", "bind an assistant or tools", (2, Some(4)), use_command),
        CommandSpec::parsed("show", "show [option|ai [name]|tool [name]|taskbox]", "print settings", (0, Some(2)), show),
        CommandSpec::raw("search", "search <query>", "web search, attached to the next request", search),
        CommandSpec::parsed("goto", "goto <url>", "fetch a page, attached to the next request", (1, Some(1)), goto),
        CommandSpec::parsed("down", "down <url>", "download into the sandbox", (1, Some(1)), download),
        CommandSpec::parsed("open", "open <path>", "open with the system handler", (1, None), open),
        CommandSpec::parsed("start", "start taskbox", "start the taskbox container", (1, Some(1)), start),
        CommandSpec::parsed("stop", "stop taskbox", "stop the taskbox container", (1, Some(1)), stop),
        CommandSpec::parsed("no_log", "no_log", "stop writing the conversation log", (0, Some(0)), disable_log),
        CommandSpec::parsed("-no_log", "-no_log", "resume writing the conversation log", (0, Some(0)), enable_log),
    ];
    for spec in commands {
        registry.register(spec);
    }
    registry.alias("quit", "exit");
    registry.alias("bye", "exit");
    registry.alias("frequence_penalty", "frequency_penalty");
    registry.alias("-frequence_penalty", "-frequency_penalty");
    registry
}

fn help(session: &mut Session, args: &[&str]) -> Result<()> {
    let prefix = session.prefix();
    let registry = session.registry();
    if let Some(name) = args.first() {
        let spec = registry
            .get(name)
            .with_context(|| format!("no command named '{name}'"))?;
        session
            .console
            .output(format!("{prefix}{}\n  {}", spec.usage, spec.summary));
        return Ok(());
    }

    let mut text = format!(
        "Lines starting with '{prefix}' are commands; '{prefix}{prefix}' sends a literal '{prefix}'.\n\
         '<<EOF' starts a multi-line request ended by a line 'EOF'; '->X' changes the prefix.\n"
    );
    for spec in registry.commands().filter(|spec| !spec.name.starts_with('-')) {
        text.push_str(&format!("  {prefix}{:<44} {}\n", spec.usage, spec.summary));
    }
    text.push_str("Most settings have a '-name' form that resets them.");
    session.console.output(text);
    Ok(())
}

fn exit(session: &mut Session, _args: &[&str]) -> Result<()> {
    session.request_exit();
    Ok(())
}

fn clear(session: &mut Session, _args: &[&str]) -> Result<()> {
    if session.history.current().request().is_some() {
        bail!("a request is in progress");
    }
    let rounds = session.history.len();
    session.history.clear();
    session
        .console
        .notice(format!("cleared {rounds} round(s) of history"));
    Ok(())
}

fn set_named(session: &mut Session, name: &str, args: &[&str]) -> Result<()> {
    session.set_option(name, &args.join(" "))
}

fn reset_named(session: &mut Session, name: &str) -> Result<()> {
    let removed = session.reset_option(name)?;
    let shown = session.options.describe(name);
    if removed {
        session.console.notice(shown);
    } else {
        session.console.notice(format!("{name} was not set"));
    }
    Ok(())
}

macro_rules! option_commands {
    ($($set:ident, $reset:ident => $name:literal;)*) => {
        $(
            fn $set(session: &mut Session, args: &[&str]) -> Result<()> {
                set_named(session, $name, args)
            }

            fn $reset(session: &mut Session, _args: &[&str]) -> Result<()> {
                reset_named(session, $name)
            }
        )*
    };
}

option_commands! {
    set_model, reset_model => "model";
    set_temperature, reset_temperature => "temperature";
    set_top_p, reset_top_p => "top_p";
    set_presence_penalty, reset_presence_penalty => "presence_penalty";
    set_frequency_penalty, reset_frequency_penalty => "frequency_penalty";
    set_logprobs, reset_logprobs => "logprobs";
    set_max_tokens, reset_max_tokens => "max_tokens";
    set_talk_mode, reset_talk_mode => "talk_mode";
    set_base_url, reset_base_url => "base_url";
    set_api_key_name, reset_api_key_name => "api_key_name";
    set_complete_type, reset_complete_type => "complete_type";
}

fn reset_prompt(session: &mut Session, _args: &[&str]) -> Result<()> {
    reset_named(session, "prompt")
}

fn reset_prefix(session: &mut Session, _args: &[&str]) -> Result<()> {
    reset_named(session, "prefix")
}

fn reset_suffix(session: &mut Session, _args: &[&str]) -> Result<()> {
    reset_named(session, "suffix")
}

fn set_text(session: &mut Session, name: &str, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("{name} needs text, inline or as {name}<<EOF");
    }
    session.options.set(name, text)?;
    let lines = text.lines().count().max(1);
    session
        .console
        .notice(format!("{name} set ({lines} line(s))"));
    Ok(())
}

fn set_prompt(session: &mut Session, text: &str) -> Result<()> {
    set_text(session, "prompt", text)
}

fn set_prefix(session: &mut Session, text: &str) -> Result<()> {
    set_text(session, "prefix", text)
}

fn set_suffix(session: &mut Session, text: &str) -> Result<()> {
    set_text(session, "suffix", text)
}

fn attach_files(session: &mut Session, args: &[&str]) -> Result<()> {
    let base = session.working_dir().to_path_buf();
    let mut failures = 0usize;
    for path in args {
        match load_attachment(path, &base) {
            Ok(file) => {
                session.console.notice(format!(
                    "attached {} ({}, {} chars)",
                    file.path,
                    file.encoding,
                    file.content.chars().count()
                ));
                session.pending_files.push(file);
            }
            Err(error) => {
                failures += 1;
                session.console.error(format!("{error:#}"));
            }
        }
    }
    if failures == args.len() {
        bail!("no file attached");
    }
    Ok(())
}

fn clear_files(session: &mut Session, _args: &[&str]) -> Result<()> {
    let dropped = session.pending_files.len();
    session.pending_files.clear();
    session
        .console
        .notice(format!("dropped {dropped} pending attachment(s)"));
    Ok(())
}

fn set_sandbox(session: &mut Session, args: &[&str]) -> Result<()> {
    session.set_sandbox(Some(&args.join(" ")))
}

fn reset_sandbox(session: &mut Session, _args: &[&str]) -> Result<()> {
    session.set_sandbox(None)
}

fn load(session: &mut Session, args: &[&str]) -> Result<()> {
    if session.history.current().request().is_some() {
        bail!("cannot load while a request is in progress");
    }
    let path = expand_home(&args.join(" "));
    let path = if path.is_absolute() {
        path
    } else {
        session.working_dir().join(path)
    };
    let messages = load_transcript(&path)?;
    let rounds = session.replace_history(messages);
    session
        .console
        .notice(format!("loaded {rounds} round(s) from {}", path.display()));
    Ok(())
}

fn list(session: &mut Session, args: &[&str]) -> Result<()> {
    match args {
        ["ai"] => {
            let active = session.active_profile().map(|profile| profile.name.clone());
            let lines: Vec<String> = session
                .profiles
                .profiles()
                .iter()
                .enumerate()
                .map(|(idx, profile)| {
                    let marker = if active.as_deref() == Some(profile.name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    let models: Vec<&str> =
                        profile.models.iter().map(|m| m.name.as_str()).collect();
                    format!(
                        "{marker} [{idx}] {} ({}): {}",
                        profile.name,
                        profile.base_url,
                        models.join(", ")
                    )
                })
                .collect();
            session.console.output(lines.join("\n"));
        }
        ["tool"] => {
            let lines = session.tools.summary();
            session.console.output(lines.join("\n"));
        }
        _ => bail!("usage: list ai|tool"),
    }
    Ok(())
}

fn use_command(session: &mut Session, args: &[&str]) -> Result<()> {
    match args {
        ["ai", selector] => session.use_ai(selector, None).map(|_| ()),
        ["ai", selector, "model", model] => session.use_ai(selector, Some(*model)).map(|_| ()),
        ["tool", spec @ ..] => {
            session.tools.activate(&spec.join(" "))?;
            let functions: Vec<String> = session
                .tools
                .active_definitions()
                .into_iter()
                .map(|def| def.name)
                .collect();
            if functions.is_empty() {
                session.console.notice("no tools active");
            } else {
                session
                    .console
                    .notice(format!("active tools: {}", functions.join(", ")));
            }
            Ok(())
        }
        _ => bail!("usage: use ai <name|idx> [model <name|idx>] | use tool <set[:fn,...]|none>"),
    }
}

fn show(session: &mut Session, args: &[&str]) -> Result<()> {
    let text = match args {
        [] => session.options.describe_all().join("\n"),
        ["ai"] => match session.active_profile() {
            Some(active) => {
                let window = active
                    .context_window
                    .map_or_else(|| "default".to_string(), |w| w.to_string());
                format!(
                    "{} model={} base_url={} context_window={window}",
                    active.name, active.model, active.base_url
                )
            }
            None => "no assistant bound; see `list ai`".to_string(),
        },
        ["ai", name] => session
            .profiles
            .resolve(name)
            .map(|(_, profile)| profile.describe())
            .with_context(|| format!("unknown assistant '{name}'"))?,
        ["tool"] => session.tools.summary().join("\n"),
        ["tool", name] => session.tools.describe(name)?,
        ["taskbox"] => session.taskbox.status()?,
        [option] => {
            if option_spec(option).is_none() {
                bail!("unknown option '{option}'");
            }
            session.options.describe(option)
        }
        _ => bail!("usage: show [option|ai [name]|tool [name]|taskbox]"),
    };
    session.console.output(text);
    Ok(())
}

fn search(session: &mut Session, query: &str) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("usage: search <query>");
    }
    session.defer(DeferredAction::Search(query.to_string()));
    Ok(())
}

fn goto(session: &mut Session, args: &[&str]) -> Result<()> {
    let url = parse_web_url(&args.join(" "))?;
    session.defer(DeferredAction::Fetch(url.to_string()));
    Ok(())
}

fn download(session: &mut Session, args: &[&str]) -> Result<()> {
    let url = parse_web_url(&args.join(" "))?;
    session.defer(DeferredAction::Download(url.to_string()));
    Ok(())
}

fn open(session: &mut Session, args: &[&str]) -> Result<()> {
    let path = expand_home(&args.join(" "));
    let path = if path.is_absolute() {
        path
    } else {
        session.working_dir().join(path)
    };
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(&path)
        .spawn()
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(())
}

fn start(session: &mut Session, args: &[&str]) -> Result<()> {
    if args != ["taskbox"] {
        bail!("usage: start taskbox");
    }
    let root = session.sandbox_root().to_path_buf();
    let report = session.taskbox.start(Some(&root))?;
    session.console.notice(report);
    Ok(())
}

fn stop(session: &mut Session, args: &[&str]) -> Result<()> {
    if args != ["taskbox"] {
        bail!("usage: stop taskbox");
    }
    let report = session.taskbox.stop()?;
    session.console.notice(report);
    Ok(())
}

fn disable_log(session: &mut Session, _args: &[&str]) -> Result<()> {
    session.logger.set_enabled(false);
    session.console.notice("conversation log paused");
    Ok(())
}

fn enable_log(session: &mut Session, _args: &[&str]) -> Result<()> {
    session.logger.set_enabled(true);
    match session.logger.location() {
        Some(path) => {
            let shown = path.display().to_string();
            session
                .console
                .notice(format!("conversation log resumed: {shown}"));
        }
        None => session.console.notice("conversation log resumed"),
    }
    Ok(())
}
