//! Terminal title annotation via the xterm OSC 0 sequence.

use std::io::{IsTerminal, Write};

use mediagen_client::presenter::TitleAnnotator;

pub struct TerminalTitle {
    default: String,
    enabled: bool,
}

impl TerminalTitle {
    /// Writes only when stderr is a terminal.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            enabled: std::io::stderr().is_terminal(),
        }
    }

    fn write(&self, title: &str) {
        if !self.enabled {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\x1b]0;{title}\x07");
        let _ = stderr.flush();
    }
}

impl TitleAnnotator for TerminalTitle {
    fn annotate(&self, text: &str) {
        self.write(&format!("{text} - {}", self.default));
    }

    fn reset(&self) {
        self.write(&self.default);
    }
}
