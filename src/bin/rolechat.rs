//! Interactive shell for role-preset chats.
//!
//! This binary keeps every chat in a local state file and streams replies from a chat server
//! that speaks the `/api/chat` protocol.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a server on localhost:3000, storing chats in the user data dir
//! rolechat
//!
//! # Pick the server and model
//! rolechat --base-url http://chat.local:3000/ --model gemini-pro
//!
//! # Override role prompts from a YAML file
//! rolechat --prompts prompts.yaml
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/role <name>` - Switch to a role preset's chat
//! - `/new` - Start a new chat
//! - `/retry` - Regenerate the last reply
//! - `/quit` - Exit the application

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;

use rolechat::roles::{self, PRESETS};
use rolechat::utils::time::format as format_time;
use rolechat::{
    Attachment, ChatArgs, ChatBackend, ChatCommand, ChatConfig, Conversation,
    DEFAULT_ROLE, FileStorage, Navigator, PlainTextRenderer, PromptOverrides, Renderer, Route,
    SessionStore, chat_list, help_text, parse_command,
};

/// Shown when input arrives on a not-found route.
const NO_CHAT: &str = "No chat is open here; use /new, /open <id> or /role <name>.";

/// The cancellation token of the turn in flight, if any.
type ActiveTurn = Arc<Mutex<Option<CancellationToken>>>;

/// Main entry point for the rolechat application.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("rolechat [OPTIONS]");
    let config = ChatConfig::from(args);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);

    let (mut store, load_error) =
        SessionStore::open_or_fresh(FileStorage::new(config.state_file.clone()));
    if let Some(err) = load_error {
        renderer.print_error(&format!(
            "Could not load {}: {err}. Starting with an empty store.",
            config.state_file.display()
        ));
    }
    if let Some(path) = &config.prompts_file {
        let overrides = PromptOverrides::from_file(path)?;
        for (role, prompt) in &overrides.prompts {
            store.update_prompt(role, prompt.clone());
        }
    }

    let client = config.client()?;
    if let Some(model) = &config.model {
        store.set_selected_model(Some(model.clone()));
    } else if store.selected_model().is_none() {
        match client.list_models().await.into_iter().next() {
            Some(model) => {
                renderer.print_info(&format!("Using model: {model}"));
                store.set_selected_model(Some(model));
            }
            None => renderer.print_info("No model selected; use /models and /model <name>."),
        }
    }

    let mut rl = DefaultEditor::new()?;

    // Ctrl+C cancels the turn in flight.
    let active: ActiveTurn = Arc::new(Mutex::new(None));
    let active_clone = Arc::clone(&active);
    ctrlc::set_handler(move || {
        if let Ok(slot) = active_clone.lock()
            && let Some(cancel) = slot.as_ref()
        {
            cancel.cancel();
        }
    })?;

    if !store.is_initialized() {
        let name = loop {
            match rl.readline("What should I call you? ") {
                Ok(line) if !line.trim().is_empty() => break line.trim().to_string(),
                Ok(_) => continue,
                Err(_) => return Ok(()),
            }
        };
        store.set_user_name(name);
        store.set_initialized(true);
    }

    let mut navigator = Navigator::resume(&mut store);
    let mut conversation = conversation_for(navigator.current_chat_id());

    println!(
        "Welcome, {} (model: {})",
        store.user_name(),
        store.selected_model().unwrap_or("none")
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline(&prompt_for(&navigator, &store));

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                let Some(cmd) = parse_command(line) else {
                    if !navigator.accepts_turns() {
                        renderer.print_error(NO_CHAT);
                        continue;
                    }
                    let cancel = begin_turn(&active);
                    let result = conversation
                        .submit(&mut store, &client, line, &mut renderer, cancel)
                        .await;
                    end_turn(&active);
                    if result.is_ok() {
                        navigator.committed(&store);
                    }
                    continue;
                };

                match cmd {
                    ChatCommand::Quit => {
                        println!("Goodbye!");
                        break;
                    }
                    ChatCommand::Help => {
                        for line in help_text().lines() {
                            println!("    {}", line);
                        }
                    }
                    ChatCommand::New => {
                        navigator.new_chat(&mut store);
                        conversation = conversation_for(navigator.current_chat_id());
                        renderer.print_info("Started a new chat.");
                    }
                    ChatCommand::Chats => print_chats(&store),
                    ChatCommand::Open(id) => match navigator.open(&mut store, &id).map(|_| ()) {
                        Ok(_) => {
                            conversation = conversation_for(navigator.current_chat_id());
                            print_history(&store, navigator.current_chat_id(), &mut renderer);
                        }
                        Err(err) => renderer.print_error(&err.to_string()),
                    },
                    ChatCommand::Roles => {
                        println!("    Roles:");
                        for preset in PRESETS {
                            println!(
                                "      {:<20} role: {:<12} chat: {}",
                                preset.name, preset.role, preset.thread_id
                            );
                        }
                    }
                    ChatCommand::Role(query) => match roles::find(&query) {
                        Some(preset) => {
                            navigator.open_role(&mut store, preset);
                            conversation = conversation_for(navigator.current_chat_id());
                            renderer.print_info(&format!("Switched to {}.", preset.name));
                            print_history(&store, preset.thread_id, &mut renderer);
                        }
                        None => renderer.print_error(&format!("No role matches '{query}'.")),
                    },
                    ChatCommand::Delete(id) => {
                        let id = id.unwrap_or_else(|| navigator.current_chat_id().to_string());
                        if store.is_in_flight(&id) {
                            renderer.print_error("That chat has a reply in progress.");
                            continue;
                        }
                        let was_current = id == navigator.current_chat_id();
                        navigator.delete_chat(&mut store, &id);
                        if was_current {
                            conversation = conversation_for(navigator.current_chat_id());
                        }
                        renderer.print_info(&format!("Deleted chat {id}."));
                    }
                    ChatCommand::Clear => {
                        match roles::for_thread(navigator.current_chat_id()) {
                            Some(preset) => {
                                navigator.clear_role_chat(&mut store, preset);
                                renderer.print_info("Chat cleared.");
                            }
                            None => renderer
                                .print_error("Only role chats can be cleared; use /delete instead."),
                        }
                    }
                    ChatCommand::RemoveMessage(message_id) => {
                        if !navigator.accepts_turns() {
                            renderer.print_error(NO_CHAT);
                            continue;
                        }
                        match conversation.delete_message(&mut store, &message_id) {
                            Ok(()) => renderer.print_info("Message deleted."),
                            Err(err) => renderer.print_error(&err.to_string()),
                        }
                    }
                    ChatCommand::Retry => {
                        if !navigator.accepts_turns() {
                            renderer.print_error(NO_CHAT);
                            continue;
                        }
                        let cancel = begin_turn(&active);
                        let result = conversation
                            .retry(&mut store, &client, &mut renderer, cancel)
                            .await;
                        end_turn(&active);
                        match result {
                            Ok(_) => {
                                navigator.committed(&store);
                            }
                            Err(err) if !err.is_transport() && !err.is_abort() => {
                                renderer.print_error(&err.to_string());
                            }
                            Err(_) => {}
                        }
                    }
                    ChatCommand::History => {
                        print_history(&store, navigator.current_chat_id(), &mut renderer);
                    }
                    ChatCommand::Models => {
                        let models = client.list_models().await;
                        if models.is_empty() {
                            renderer.print_info("No models available.");
                        }
                        for model in models {
                            let marker = if store.selected_model() == Some(model.as_str()) {
                                "*"
                            } else {
                                " "
                            };
                            println!("    {marker} {model}");
                        }
                    }
                    ChatCommand::Model(model) => {
                        renderer.print_info(&format!("Model changed to: {}", model));
                        store.set_selected_model(Some(model));
                    }
                    ChatCommand::Prompt(text) => {
                        let role = prompt_role(&navigator, &store);
                        match text {
                            Some(text) => {
                                store.update_prompt(&role, text);
                                renderer.print_info(&format!("Prompt for '{role}' updated."));
                            }
                            None => {
                                println!("    Prompt for '{role}':");
                                for line in store.prompt(Some(&role)).lines() {
                                    println!("      {line}");
                                }
                            }
                        }
                    }
                    ChatCommand::Name(name) => {
                        renderer.print_info(&format!("Hello, {name}."));
                        store.set_user_name(name);
                    }
                    ChatCommand::Image(input) => match Attachment::resolve(&input) {
                        Ok(attachment) => {
                            store.push_pending_image(attachment);
                            let vision = store
                                .selected_model()
                                .is_some_and(|m| client.supports_vision(m));
                            renderer.print_info(&format!(
                                "{} image(s) attached to your next message{}",
                                store.pending_images().len(),
                                if vision {
                                    "."
                                } else {
                                    " (the selected model ignores images)."
                                }
                            ));
                        }
                        Err(err) => renderer.print_error(&err.to_string()),
                    },
                    ChatCommand::Reset => {
                        store.reset();
                        navigator.new_chat(&mut store);
                        conversation = conversation_for(navigator.current_chat_id());
                        renderer.print_info("All chats deleted.");
                    }
                    ChatCommand::Invalid(message) => {
                        renderer.print_error(&message);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn conversation_for(chat_id: &str) -> Conversation {
    match roles::for_thread(chat_id) {
        Some(preset) => Conversation::for_role(chat_id, preset.role),
        None => Conversation::new(chat_id),
    }
}

fn begin_turn(active: &ActiveTurn) -> CancellationToken {
    let cancel = CancellationToken::new();
    if let Ok(mut slot) = active.lock() {
        *slot = Some(cancel.clone());
    }
    cancel
}

fn end_turn(active: &ActiveTurn) {
    if let Ok(mut slot) = active.lock() {
        *slot = None;
    }
}

/// The role whose prompt `/prompt` shows or edits.
fn prompt_role(navigator: &Navigator, store: &SessionStore) -> String {
    let chat_id = navigator.current_chat_id();
    store
        .role(chat_id)
        .or_else(|| roles::for_thread(chat_id).map(|p| p.role))
        .unwrap_or(DEFAULT_ROLE)
        .to_string()
}

fn prompt_for(navigator: &Navigator, store: &SessionStore) -> String {
    let name = match store.user_name() {
        "" => "You",
        name => name,
    };
    match navigator.route() {
        Route::Chat(id) => match roles::for_thread(id) {
            Some(preset) => format!("[{}] {name}: ", preset.name),
            None => format!("{name}: "),
        },
        Route::New(_) => format!("[new] {name}: "),
        Route::NotFound(_) => format!("[not found] {name}: "),
    }
}

fn print_chats(store: &SessionStore) {
    let chats = chat_list(store);
    if chats.is_empty() {
        println!("    No chats yet.");
        return;
    }
    println!("    Chats:");
    for chat in chats {
        let created = format_time(&chat.created_at).unwrap_or_default();
        let title: String = chat.title.chars().take(48).collect();
        println!(
            "      {}  {}  {:>3} msgs  {}",
            chat.id, created, chat.message_count, title
        );
    }
}

fn print_history(store: &SessionStore, chat_id: &str, renderer: &mut dyn Renderer) {
    match store.messages(chat_id) {
        Some(messages) if !messages.is_empty() => {
            for message in messages {
                renderer.print_message(message);
            }
        }
        _ => renderer.print_info("(no messages yet)"),
    }
}
