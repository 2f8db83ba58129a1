use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Text,
    Json,
}

/// Owns the input side of the session: a background reader pushing raw lines
/// into a queue that the dispatch loop drains with timeouts.
pub struct InputClient {
    mode: InputMode,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
    started: bool,
}

impl InputClient {
    pub fn new(mode: InputMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            mode,
            tx,
            rx,
            stop: CancellationToken::new(),
            started: false,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Launches the stdin reader unless one is already running.
    pub fn start(&mut self) -> Result<()> {
        self.start_with_reader(std::io::BufReader::new(std::io::stdin()))
    }

    pub fn start_with_reader<R>(&mut self, reader: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        if self.started {
            return Ok(());
        }

        let tx = self.tx.clone();
        let stop = self.stop.clone();
        let mode = self.mode;
        std::thread::Builder::new()
            .name("talkshell-input".to_string())
            .spawn(move || read_lines(reader, mode, tx, stop))
            .context("failed to spawn input reader thread")?;
        self.started = true;
        Ok(())
    }

    /// Waits up to `timeout` for the next raw input unit.
    pub async fn fetch_line(&mut self, timeout: Duration) -> Option<String> {
        if let Ok(line) = self.rx.try_recv() {
            return Some(line);
        }
        if timeout.is_zero() {
            return None;
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(line) => line,
            Err(_) => None,
        }
    }

    pub fn try_fetch_line(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// True when no queued input is waiting.
    pub fn is_drained(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Queues text as if it had been typed. Fails once the session stopped.
    pub fn post_user_input(&self, text: impl Into<String>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.tx.send(text.into()).is_ok()
    }
}

fn read_lines<R: BufRead>(
    mut reader: R,
    mode: InputMode,
    tx: mpsc::UnboundedSender<String>,
    stop: CancellationToken,
) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                eprintln!("error: failed to read input: {error}");
                break;
            }
        }
        if stop.is_cancelled() {
            return;
        }

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        let line = match String::from_utf8(std::mem::take(&mut buf)) {
            Ok(line) => line,
            Err(error) => {
                eprintln!("error: input line is not valid UTF-8 ({error}); line skipped");
                continue;
            }
        };
        let line = match decode_line(mode, line) {
            Ok(line) => line,
            Err(error) => {
                eprintln!("error: {error:#}; input skipped");
                continue;
            }
        };
        if tx.send(line).is_err() {
            return;
        }
    }
    tracing::debug!("input reached end of stream");
    stop.cancel();
}

fn decode_line(mode: InputMode, line: String) -> Result<String> {
    match mode {
        InputMode::Text => Ok(line),
        InputMode::Json if line.trim().is_empty() => Ok(String::new()),
        InputMode::Json => decode_json_line(&line),
    }
}

/// A JSON input unit is a string or an object with a string `content` field.
pub fn decode_json_line(line: &str) -> Result<String> {
    let value: Value = serde_json::from_str(line).context("malformed JSON input")?;
    match value {
        Value::String(text) => Ok(text),
        Value::Object(map) => map
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("JSON input object needs a string \"content\" field")),
        _ => bail!("JSON input must be a string or an object"),
    }
}
