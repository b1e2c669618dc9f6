//! Thread navigation: listing, creating, opening and deleting chats.
//!
//! [`Navigator`] tracks the current [`Route`] and keeps the store's active thread in step with
//! it.  Role-preset threads live at the stable ids from [`crate::roles`]; ad hoc threads get a
//! fresh UUID.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::roles::RolePreset;
use crate::store::SessionStore;

/// What the shell is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A thread that has no committed turn yet.
    New(String),
    /// An existing thread.
    Chat(String),
    /// A thread id that does not exist.
    NotFound(String),
}

impl Route {
    /// The thread id this route points at.
    pub fn chat_id(&self) -> &str {
        match self {
            Route::New(id) | Route::Chat(id) | Route::NotFound(id) => id,
        }
    }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    /// Thread id.
    pub id: String,
    /// Content of the first message; empty for a thread without messages.
    pub title: String,
    /// When the thread was created.
    pub created_at: OffsetDateTime,
    /// Number of messages in the thread.
    pub message_count: usize,
}

/// Ad hoc threads, newest first.
///
/// Role-preset threads are reached through their presets and are not listed.
pub fn chat_list(store: &SessionStore) -> Vec<ChatSummary> {
    let mut chats: Vec<ChatSummary> = store
        .sessions()
        .filter(|(_, session)| session.is_ad_hoc())
        .map(|(id, session)| ChatSummary {
            id: id.to_string(),
            title: session.title().to_string(),
            created_at: session.created_at,
            message_count: session.messages.len(),
        })
        .collect();
    chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    chats
}

/// Tracks the current route.
#[derive(Debug, Clone)]
pub struct Navigator {
    route: Route,
}

impl Navigator {
    /// Start on the store's active thread, or on a fresh one when there is none.
    pub fn resume(store: &mut SessionStore) -> Self {
        match store.current_chat_id().map(String::from) {
            Some(id) if store.session(&id).is_some() => Self {
                route: Route::Chat(id),
            },
            _ => {
                let mut navigator = Self {
                    route: Route::New(String::new()),
                };
                navigator.new_chat(store);
                navigator
            }
        }
    }

    /// The current route.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// The thread the current route points at.
    pub fn current_chat_id(&self) -> &str {
        self.route.chat_id()
    }

    /// Whether a turn may be sent from the current route.  A not-found route has no thread.
    pub fn accepts_turns(&self) -> bool {
        !matches!(self.route, Route::NotFound(_))
    }

    /// Go to a fresh ad hoc thread.
    ///
    /// The thread is not created in the store until its first turn commits.
    pub fn new_chat(&mut self, store: &mut SessionStore) -> &Route {
        let id = Uuid::new_v4().to_string();
        store.set_current_chat_id(Some(id.clone()));
        self.route = Route::New(id);
        &self.route
    }

    /// Go to a role preset's thread, creating it bound to the preset's role if needed.
    pub fn open_role(&mut self, store: &mut SessionStore, preset: &RolePreset) -> &Route {
        store.create_session(preset.thread_id, Some(preset.role));
        store.set_current_chat_id(Some(preset.thread_id.to_string()));
        self.route = Route::Chat(preset.thread_id.to_string());
        &self.route
    }

    /// Go to thread `id`.
    ///
    /// An unknown id routes to [`Route::NotFound`] and returns a not-found error; the active
    /// thread is left as it was.
    pub fn open(&mut self, store: &mut SessionStore, id: &str) -> Result<&Route> {
        if store.session(id).is_none() {
            self.route = Route::NotFound(id.to_string());
            return Err(Error::chat_not_found(id));
        }
        store.set_current_chat_id(Some(id.to_string()));
        self.route = Route::Chat(id.to_string());
        Ok(&self.route)
    }

    /// Delete thread `id`.  Deleting the thread on screen moves to a fresh one.
    pub fn delete_chat(&mut self, store: &mut SessionStore, id: &str) -> &Route {
        store.delete_message(id, None);
        if self.route.chat_id() == id {
            self.new_chat(store);
        }
        &self.route
    }

    /// Empty a role preset's thread, keeping the thread and its role.
    pub fn clear_role_chat(&mut self, store: &mut SessionStore, preset: &RolePreset) {
        store.create_session(preset.thread_id, Some(preset.role));
        store.save_messages(preset.thread_id, Vec::new());
    }

    /// Note that a turn committed on the current thread.
    ///
    /// A new thread becomes a regular one once it has history.
    pub fn committed(&mut self, store: &SessionStore) -> &Route {
        let promoted = match &self.route {
            Route::New(id) if store.session(id).is_some() => Some(id.clone()),
            _ => None,
        };
        if let Some(id) = promoted {
            self.route = Route::Chat(id);
        }
        &self.route
    }
}
