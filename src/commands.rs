//! Slash command parsing for the chat shell.
//!
//! Input starting with `/` controls the shell and is never sent to the server.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Exit the shell.
    Quit,

    /// Start a fresh ad hoc thread.
    New,

    /// List ad hoc threads.
    Chats,

    /// Open a thread by id.
    Open(String),

    /// List the role presets.
    Roles,

    /// Open a role preset's thread by name, role key or thread id.
    Role(String),

    /// Delete a thread; `None` deletes the current one.
    Delete(Option<String>),

    /// Empty the current role-preset thread.
    Clear,

    /// Remove one message from the current thread.
    RemoveMessage(String),

    /// Regenerate the last reply.
    Retry,

    /// Print the current thread.
    History,

    /// List the models the server offers.
    Models,

    /// Change the selected model.
    Model(String),

    /// Show the current thread's prompt, or replace it.
    Prompt(Option<String>),

    /// Change the user name.
    Name(String),

    /// Attach an image (URL or local file) to the next message.
    Image(String),

    /// Delete every thread.
    Reset,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be sent as a
/// regular message.
///
/// # Examples
///
/// ```
/// # use rolechat::commands::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/role translator").is_some());
/// assert!(parse_command("Xin chào").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "new" => ChatCommand::New,
        "chats" | "list" => ChatCommand::Chats,
        "open" => required(argument, "/open requires a chat id", ChatCommand::Open),
        "roles" => ChatCommand::Roles,
        "role" => required(argument, "/role requires a role name", ChatCommand::Role),
        "delete" => ChatCommand::Delete(argument.map(String::from)),
        "clear" => ChatCommand::Clear,
        "rm" => required(argument, "/rm requires a message id", ChatCommand::RemoveMessage),
        "retry" | "regenerate" => ChatCommand::Retry,
        "history" => ChatCommand::History,
        "models" => ChatCommand::Models,
        "model" => required(argument, "/model requires a model name", ChatCommand::Model),
        "prompt" => ChatCommand::Prompt(argument.map(String::from)),
        "name" => required(argument, "/name requires a name", ChatCommand::Name),
        "image" => required(argument, "/image requires a URL or file path", ChatCommand::Image),
        "reset" => ChatCommand::Reset,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn required<F>(argument: Option<&str>, missing: &str, constructor: F) -> ChatCommand
where
    F: Fn(String) -> ChatCommand,
{
    match argument {
        Some(arg) => constructor(arg.to_string()),
        None => ChatCommand::Invalid(missing.to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new chat
  /chats                 List your chats
  /open <id>             Open a chat by id
  /roles                 List role presets
  /role <name>           Switch to a role preset's chat
  /delete [id]           Delete a chat (default: the current one)
  /clear                 Clear the current role chat
  /rm <message-id>       Delete one message
  /retry                 Regenerate the last reply
  /history               Show the current chat
  /models                List available models
  /model <name>          Change the model
  /prompt [text]         Show or replace the current role's prompt
  /name <name>           Change your name
  /image <url|path>      Attach an image to your next message
  /reset                 Delete all chats
  /help                  Show this help message
  /quit                  Exit"#
}
