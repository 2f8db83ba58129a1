use super::preview::{compact_arguments, result_summary, truncate_to_display_width};
use crate::session::accumulator::StreamPiece;
use crossterm::style::Stylize;
use std::io::{IsTerminal, Write};

const FALLBACK_WIDTH: usize = 100;

/// Terminal output for the session. Notices go to stdout, problems to stderr.
#[derive(Debug, Clone)]
pub struct Console {
    silent: bool,
    styled: bool,
}

impl Console {
    pub fn new(silent: bool) -> Self {
        Self {
            silent,
            styled: std::io::stdout().is_terminal(),
        }
    }

    pub fn plain(silent: bool) -> Self {
        Self {
            silent,
            styled: false,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    fn width(&self) -> usize {
        crossterm::terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(FALLBACK_WIDTH)
            .max(20)
    }

    /// Informational text, hidden in silent mode.
    pub fn notice(&self, text: impl AsRef<str>) {
        if !self.silent {
            println!("{}", text.as_ref());
        }
    }

    /// Output the user asked for, such as `show` listings.
    pub fn output(&self, text: impl AsRef<str>) {
        println!("{}", text.as_ref());
    }

    pub fn warn(&self, text: impl AsRef<str>) {
        if self.styled {
            eprintln!("{}", format!("warning: {}", text.as_ref()).yellow());
        } else {
            eprintln!("warning: {}", text.as_ref());
        }
    }

    pub fn error(&self, text: impl AsRef<str>) {
        if self.styled {
            eprintln!("{}", format!("error: {}", text.as_ref()).red());
        } else {
            eprintln!("error: {}", text.as_ref());
        }
    }

    pub fn render(&self, piece: &StreamPiece) {
        match piece {
            StreamPiece::ThinkStart => self.write_raw("<think>\n", true),
            StreamPiece::Thinking(text) => self.write_raw(text, true),
            StreamPiece::ThinkEnd => self.write_raw("\n</think>\n", true),
            StreamPiece::Content(text) => self.write_raw(text, false),
        }
    }

    /// Ends a streamed response.
    pub fn end_response(&self) {
        println!();
    }

    pub fn tool_call(&self, name: &str, arguments: &str) {
        let line = format!("* Tool: {name}({})", compact_arguments(name, arguments));
        let line = truncate_to_display_width(&line, self.width());
        if self.styled {
            println!("{}", line.cyan());
        } else {
            println!("{line}");
        }
    }

    pub fn tool_result(&self, content: &str) {
        let line = format!("  -> {}", result_summary(content));
        let line = truncate_to_display_width(&line, self.width());
        if self.styled {
            println!("{}", line.dim());
        } else {
            println!("{line}");
        }
    }

    fn write_raw(&self, text: &str, dim: bool) {
        if dim && self.styled {
            print!("{}", text.dim());
        } else {
            print!("{text}");
        }
        let _ = std::io::stdout().flush();
    }
}
