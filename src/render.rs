//! Output rendering for the chat shell.
//!
//! The [`Renderer`] trait is what a conversation writes to while a response streams in.  The
//! default implementation prints to stdout with optional ANSI styling.

use std::io::{self, Stdout, Write};

use crate::types::{Message, MessageRole};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for speaker labels).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the user's label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Called before the first fragment of a response.
    fn start_response(&mut self) {}

    /// Print a chunk of response text.
    ///
    /// This is called incrementally as fragments are streamed from the server.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a stored message, as when replaying a thread's history.
    fn print_message(&mut self, message: &Message) {
        self.print_info(&format!("{}: {}", message.role, message.content));
    }

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self) {
        self.print_info("[interrupted]");
    }

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    in_response: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            in_response: false,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    /// Terminate a half-printed response line before printing something else.
    fn break_line(&mut self) {
        if self.in_response {
            println!();
            self.in_response = false;
        }
    }

    fn label(&self, role: MessageRole) -> String {
        if !self.use_color {
            return format!("{role}>");
        }
        let color = match role {
            MessageRole::User => ANSI_GREEN,
            MessageRole::Assistant | MessageRole::System => ANSI_CYAN,
        };
        format!("{color}{role}>{ANSI_RESET}")
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        print!("{} ", self.label(MessageRole::Assistant));
        self.in_response = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.break_line();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        self.break_line();
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
    }

    fn print_message(&mut self, message: &Message) {
        self.break_line();
        println!("{} {}", self.label(message.role), message.content);
        if !message.attachments.is_empty() {
            self.print_info(&format!("  [{} image(s)]", message.attachments.len()));
        }
        if self.use_color {
            println!("{ANSI_DIM}  id: {}{ANSI_RESET}", message.id);
        } else {
            println!("  id: {}", message.id);
        }
    }

    fn finish_response(&mut self) {
        self.break_line();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.break_line();
        println!("[interrupted]");
        self.flush();
    }
}
