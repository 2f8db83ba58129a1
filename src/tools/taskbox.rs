use super::{required_tool_string, ToolDefinition, ToolSet};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

const DEFAULT_IMAGE: &str = "python:3.12-slim";
const WORKSPACE_MOUNT: &str = "/workspace";
const MAX_OUTPUT_CHARS: usize = 16_000;

/// A disposable container the model can run commands in.
pub trait Taskbox: Send + Sync {
    fn start(&self, sandbox: Option<&Path>) -> Result<String>;
    fn stop(&self) -> Result<String>;
    fn status(&self) -> Result<String>;
    fn exec(&self, command: &str) -> Result<String>;
}

/// Drives the `docker` CLI; the sandbox root is mounted at `/workspace`.
pub struct DockerTaskbox {
    image: String,
    container: String,
}

impl DockerTaskbox {
    pub fn new() -> Self {
        Self {
            image: std::env::var("TALKSHELL_TASKBOX_IMAGE")
                .unwrap_or_else(|_| DEFAULT_IMAGE.to_string()),
            container: format!("talkshell-taskbox-{}", std::process::id()),
        }
    }

    fn run_docker(&self, args: &[&str]) -> Result<Output> {
        Command::new("docker")
            .args(args)
            .output()
            .context("failed to execute docker command")
    }

    fn run_docker_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run_docker(args)?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let details = if stderr.is_empty() { stdout } else { stderr };
            bail!("docker {} failed: {details}", args.first().unwrap_or(&""));
        }
        Ok(stdout)
    }
}

impl Default for DockerTaskbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Taskbox for DockerTaskbox {
    fn start(&self, sandbox: Option<&Path>) -> Result<String> {
        if self.status()? == "running" {
            return Ok(format!("taskbox {} is already running", self.container));
        }
        let mount = sandbox.map(|root| format!("{}:{WORKSPACE_MOUNT}", root.display()));
        let mut args: Vec<&str> = vec!["run", "-d", "--rm", "--name", self.container.as_str()];
        if let Some(mount) = mount.as_deref() {
            args.extend(["-v", mount]);
        }
        args.extend(["-w", WORKSPACE_MOUNT, self.image.as_str(), "sleep", "infinity"]);
        self.run_docker_checked(&args)?;
        Ok(format!(
            "taskbox {} started from {}{}",
            self.container,
            self.image,
            sandbox
                .map(|root| format!(" with {} at {WORKSPACE_MOUNT}", root.display()))
                .unwrap_or_default()
        ))
    }

    fn stop(&self) -> Result<String> {
        if self.status()? != "running" {
            return Ok(format!("taskbox {} is not running", self.container));
        }
        self.run_docker_checked(&["rm", "-f", &self.container])?;
        Ok(format!("taskbox {} stopped", self.container))
    }

    fn status(&self) -> Result<String> {
        let output = self.run_docker(&["inspect", "-f", "{{.State.Status}}", &self.container])?;
        if !output.status.success() {
            return Ok("not running".to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn exec(&self, command: &str) -> Result<String> {
        if self.status()? != "running" {
            bail!("taskbox is not running; use `start taskbox` first");
        }
        let output = self.run_docker(&[
            "exec",
            "-w",
            WORKSPACE_MOUNT,
            &self.container,
            "sh",
            "-c",
            command,
        ])?;
        Ok(format_exec_output(&output))
    }
}

fn format_exec_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut text = String::new();
    if !stdout.trim().is_empty() {
        text.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str("[stderr]\n");
        text.push_str(stderr.trim_end());
    }
    if let Some((idx, _)) = text.char_indices().nth(MAX_OUTPUT_CHARS) {
        text.truncate(idx);
        text.push_str("\n[output truncated]");
    }
    let code = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |code| code.to_string());
    if text.is_empty() {
        format!("(no output, exit {code})")
    } else {
        format!("{text}\n(exit {code})")
    }
}

/// Exposes `run_shell` backed by the taskbox.
pub struct ShellTools {
    taskbox: Arc<dyn Taskbox>,
}

impl ShellTools {
    pub fn new(taskbox: Arc<dyn Taskbox>) -> Self {
        Self { taskbox }
    }
}

impl ToolSet for ShellTools {
    fn name(&self) -> &str {
        "taskbox"
    }

    fn description(&self) -> &str {
        "run shell commands inside the taskbox container"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "run_shell",
            "Run a shell command in the taskbox; the sandbox is mounted at /workspace",
            json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"]
            }),
        )]
    }

    fn call(&self, function: &str, args: &Value) -> Result<String> {
        match function {
            "run_shell" => {
                let command = required_tool_string(args, function, "command", &["command", "cmd"])?;
                self.taskbox.exec(command)
            }
            _ => bail!("unknown taskbox function: {function}"),
        }
    }
}
