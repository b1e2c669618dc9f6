//! The persistent session store.
//!
//! [`SessionStore`] exclusively owns every chat thread, the prompt table and the global
//! settings.  All mutations are synchronous and go through `&mut self`; after each one that
//! changes persisted state the store writes a snapshot to its [`Storage`] and tells every
//! subscribed [`StoreObserver`] what changed.
//!
//! Persistence is best-effort: a failed write is counted and reported to observers as
//! [`StoreChange::PersistFailed`], but never fails the mutation that caused it.

mod snapshot;
mod storage;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub use snapshot::{CURRENT_VERSION, PersistedState, decode, encode};
pub use storage::{FileStorage, MemoryStorage, Storage};

use crate::error::{Error, Result};
use crate::observability::{STORE_PERSIST_ERRORS, STORE_PERSISTS, STORE_SNAPSHOT_BYTES};
use crate::prompts::SystemPromptTable;
use crate::types::{Attachment, ChatSession, Message};

/////////////////////////////////////////// StoreChange ////////////////////////////////////////////

/// What a mutation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A session was created or rebound to a role.
    SessionCreated {
        /// Thread id.
        id: String,
    },
    /// A session's messages were replaced.
    MessagesSaved {
        /// Thread id.
        id: String,
        /// Number of messages now in the thread.
        count: usize,
    },
    /// One message was removed.
    MessageDeleted {
        /// Thread id.
        id: String,
        /// Id of the removed message.
        message_id: String,
    },
    /// A whole session was removed.
    SessionDeleted {
        /// Thread id.
        id: String,
    },
    /// The active thread changed.
    CurrentChatChanged(Option<String>),
    /// A role's prompt was set.
    PromptUpdated {
        /// Role key.
        role: String,
    },
    /// The selected model changed.
    SelectedModelChanged(Option<String>),
    /// The user name changed.
    UserNameChanged(String),
    /// The initialization flag changed.
    InitializedChanged(bool),
    /// All sessions were cleared.
    Reset,
    /// Writing the snapshot failed.
    PersistFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Receives a notification after every store mutation.
pub trait StoreObserver: Send {
    /// Called once per change, after the store has persisted it.
    fn on_change(&mut self, change: &StoreChange);
}

impl<F> StoreObserver for F
where
    F: FnMut(&StoreChange) + Send,
{
    fn on_change(&mut self, change: &StoreChange) {
        self(change)
    }
}

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/////////////////////////////////////////// TurnTicket /////////////////////////////////////////////

/// Holds a thread's in-flight mark.  Dropping it frees the thread.
#[derive(Debug)]
#[must_use]
pub struct TurnTicket {
    chat_id: String,
    alive: Arc<()>,
}

impl TurnTicket {
    /// The thread this turn runs on.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// A handle that reports whether this ticket is still held.
    pub fn watch(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }
}

/////////////////////////////////////////// SessionStore ///////////////////////////////////////////

/// Owner of all chat state.
pub struct SessionStore {
    state: PersistedState,
    storage: Box<dyn Storage>,
    observers: Vec<(SubscriptionId, Box<dyn StoreObserver>)>,
    next_subscription: u64,
    pending_images: Vec<Attachment>,
    in_flight: HashMap<String, Weak<()>>,
}

impl SessionStore {
    /// A fresh store that writes to `storage`, ignoring whatever it already holds.
    pub fn fresh(storage: impl Storage + 'static) -> Self {
        Self::with_state(PersistedState::default(), Box::new(storage))
    }

    /// A fresh store backed by memory only.
    pub fn in_memory() -> Self {
        Self::fresh(MemoryStorage::new())
    }

    /// Rehydrate from `storage`.
    ///
    /// An empty storage yields a fresh store.  A corrupt blob, or one written by a newer
    /// version, is an error.
    pub fn open(storage: impl Storage + 'static) -> Result<Self> {
        let state = match storage.load()? {
            Some(blob) => decode(&blob)?,
            None => PersistedState::default(),
        };
        Ok(Self::with_state(state, Box::new(storage)))
    }

    /// Rehydrate from `storage`, falling back to a fresh store when it cannot be read.
    ///
    /// The error that forced the fallback is returned alongside the store.
    pub fn open_or_fresh(storage: impl Storage + 'static) -> (Self, Option<Error>) {
        let loaded = storage
            .load()
            .and_then(|blob| blob.as_deref().map(decode).transpose());
        match loaded {
            Ok(state) => (
                Self::with_state(state.unwrap_or_default(), Box::new(storage)),
                None,
            ),
            Err(err) => (
                Self::with_state(PersistedState::default(), Box::new(storage)),
                Some(err),
            ),
        }
    }

    fn with_state(state: PersistedState, storage: Box<dyn Storage>) -> Self {
        Self {
            state,
            storage,
            observers: Vec::new(),
            next_subscription: 0,
            pending_images: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    /// The persisted subset of the store.
    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    ///////////////////////////////////////////// sessions /////////////////////////////////////////////

    /// Create the session `id` if absent, and bind it to `role`.
    ///
    /// An existing session keeps its messages and creation time; only its role changes.
    pub fn create_session(&mut self, id: &str, role: Option<&str>) {
        let role = role.map(String::from);
        match self.state.chats.get_mut(id) {
            Some(session) => session.role = role,
            None => {
                self.state
                    .chats
                    .insert(id.to_string(), ChatSession::new(role));
            }
        }
        self.commit(StoreChange::SessionCreated { id: id.to_string() });
    }

    /// Replace the messages of `id` wholesale.
    ///
    /// Creates an ad hoc session when `id` is unknown; otherwise creation time and role are
    /// preserved.
    pub fn save_messages(&mut self, id: &str, messages: Vec<Message>) {
        let count = messages.len();
        self.state
            .chats
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(None))
            .messages = messages;
        self.commit(StoreChange::MessagesSaved {
            id: id.to_string(),
            count,
        });
    }

    /// Remove one message of `id`, or the whole session when `message_id` is `None`.
    ///
    /// Unknown ids are ignored.
    pub fn delete_message(&mut self, id: &str, message_id: Option<&str>) {
        match message_id {
            Some(message_id) => {
                let Some(session) = self.state.chats.get_mut(id) else {
                    return;
                };
                let Some(index) = session.messages.iter().position(|m| m.id == message_id) else {
                    return;
                };
                session.messages.remove(index);
                self.commit(StoreChange::MessageDeleted {
                    id: id.to_string(),
                    message_id: message_id.to_string(),
                });
            }
            None => {
                if self.state.chats.remove(id).is_some() {
                    self.commit(StoreChange::SessionDeleted { id: id.to_string() });
                }
            }
        }
    }

    /// The session `id`.
    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.state.chats.get(id)
    }

    /// The messages of session `id`.
    pub fn messages(&self, id: &str) -> Option<&[Message]> {
        self.state.chats.get(id).map(|s| s.messages.as_slice())
    }

    /// The role session `id` is bound to.  `None` for ad hoc and unknown sessions alike.
    pub fn role(&self, id: &str) -> Option<&str> {
        self.state.chats.get(id).and_then(|s| s.role.as_deref())
    }

    /// Every session, keyed by thread id.
    pub fn sessions(&self) -> impl Iterator<Item = (&str, &ChatSession)> {
        self.state.chats.iter().map(|(id, s)| (id.as_str(), s))
    }

    ////////////////////////////////////////////// prompts //////////////////////////////////////////////

    /// System prompt for `role`, falling back to the default entry.
    pub fn prompt(&self, role: Option<&str>) -> &str {
        self.state.system_prompt.get(role)
    }

    /// Set the system prompt for `role`.
    pub fn update_prompt(&mut self, role: &str, prompt: impl Into<String>) {
        self.state.system_prompt.update(role, prompt);
        self.commit(StoreChange::PromptUpdated {
            role: role.to_string(),
        });
    }

    /// The full prompt table.
    pub fn prompts(&self) -> &SystemPromptTable {
        &self.state.system_prompt
    }

    ////////////////////////////////////////////// globals ///////////////////////////////////////////////

    /// Set the active thread.
    pub fn set_current_chat_id(&mut self, id: Option<String>) {
        self.state.current_chat_id = id.clone();
        self.commit(StoreChange::CurrentChatChanged(id));
    }

    /// The active thread.
    pub fn current_chat_id(&self) -> Option<&str> {
        self.state.current_chat_id.as_deref()
    }

    /// Set the model id sent with requests.
    pub fn set_selected_model(&mut self, model: Option<String>) {
        self.state.selected_model = model.clone();
        self.commit(StoreChange::SelectedModelChanged(model));
    }

    /// The model id sent with requests.
    pub fn selected_model(&self) -> Option<&str> {
        self.state.selected_model.as_deref()
    }

    /// Set the local user's display name.
    pub fn set_user_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.state.user_name = name.clone();
        self.commit(StoreChange::UserNameChanged(name));
    }

    /// The local user's display name.
    pub fn user_name(&self) -> &str {
        &self.state.user_name
    }

    /// Mark first-run onboarding as done or not.
    pub fn set_initialized(&mut self, initialized: bool) {
        self.state.is_initialized = initialized;
        self.commit(StoreChange::InitializedChanged(initialized));
    }

    /// Whether first-run onboarding has completed.
    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized
    }

    /// Drop every session, the active thread and pending attachments.
    ///
    /// User name, selected model, initialization flag and prompts survive.
    pub fn reset(&mut self) {
        self.state.chats.clear();
        self.state.current_chat_id = None;
        self.pending_images.clear();
        self.commit(StoreChange::Reset);
    }

    ///////////////////////////////////////////// transient //////////////////////////////////////////////

    /// Replace the attachments for the next submission.
    pub fn set_pending_images(&mut self, images: Vec<Attachment>) {
        self.pending_images = images;
    }

    /// Queue one more attachment for the next submission.
    pub fn push_pending_image(&mut self, image: Attachment) {
        self.pending_images.push(image);
    }

    /// Attachments queued for the next submission.
    pub fn pending_images(&self) -> &[Attachment] {
        &self.pending_images
    }

    /// Take the queued attachments, leaving none.
    pub fn take_pending_images(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_images)
    }

    /// Mark a turn on `id` as in flight.
    ///
    /// The mark lasts as long as the returned ticket, so a turn whose future is dropped
    /// mid-stream frees its thread.  Fails with [`Error::Busy`] if a turn already is in flight.
    pub fn begin_turn(&mut self, id: &str) -> Result<TurnTicket> {
        self.in_flight.retain(|_, alive| alive.strong_count() > 0);
        if self.in_flight.contains_key(id) {
            return Err(Error::busy(id));
        }
        let ticket = TurnTicket {
            chat_id: id.to_string(),
            alive: Arc::new(()),
        };
        self.in_flight.insert(id.to_string(), ticket.watch());
        Ok(ticket)
    }

    /// Clear the in-flight mark held by `ticket`.
    pub fn end_turn(&mut self, ticket: TurnTicket) {
        if self
            .in_flight
            .get(&ticket.chat_id)
            .is_some_and(|alive| alive.ptr_eq(&ticket.watch()))
        {
            self.in_flight.remove(&ticket.chat_id);
        }
    }

    /// Whether a turn on `id` is in flight.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight
            .get(id)
            .is_some_and(|alive| alive.strong_count() > 0)
    }

    ///////////////////////////////////////////// observers //////////////////////////////////////////////

    /// Register `observer` for change notifications.
    pub fn subscribe(&mut self, observer: Box<dyn StoreObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, observer));
        id
    }

    /// Stop notifying the observer registered under `id`.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    fn commit(&mut self, change: StoreChange) {
        if let Err(err) = self.persist() {
            STORE_PERSIST_ERRORS.click();
            self.notify(&StoreChange::PersistFailed {
                message: err.to_string(),
            });
        }
        self.notify(&change);
    }

    fn persist(&mut self) -> Result<()> {
        let blob = encode(&self.state)?;
        STORE_SNAPSHOT_BYTES.add(blob.len() as f64);
        self.storage.save(&blob)?;
        STORE_PERSISTS.click();
        Ok(())
    }

    fn notify(&mut self, change: &StoreChange) {
        for (_, observer) in self.observers.iter_mut() {
            observer.on_change(change);
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .field("pending_images", &self.pending_images)
            .field(
                "in_flight",
                &self
                    .in_flight
                    .iter()
                    .filter(|(_, alive)| alive.strong_count() > 0)
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::prompts::DEFAULT_ROLE;

    fn recorder(store: &mut SessionStore) -> Arc<Mutex<Vec<StoreChange>>> {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        store.subscribe(Box::new(move |change: &StoreChange| {
            sink.lock().unwrap().push(change.clone());
        }));
        changes
    }

    fn message(id: &str, content: &str) -> Message {
        Message::user(content).with_id(id)
    }

    #[test]
    fn create_session_is_idempotent_and_keeps_created_at() {
        let mut store = SessionStore::in_memory();
        store.create_session("abc", Some("translator"));
        let created_at = store.session("abc").unwrap().created_at;
        store.save_messages("abc", vec![message("1", "Hello")]);

        store.create_session("abc", Some("grammar"));
        let session = store.session("abc").unwrap();
        assert_eq!(session.created_at, created_at);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.role.as_deref(), Some("grammar"));
    }

    #[test]
    fn save_messages_preserves_created_at_and_role() {
        let mut store = SessionStore::in_memory();
        store.create_session("abc", Some("translator"));
        let created_at = store.session("abc").unwrap().created_at;

        store.save_messages("abc", vec![message("1", "a"), message("2", "b")]);
        store.save_messages("abc", vec![message("3", "c")]);
        let session = store.session("abc").unwrap();
        assert_eq!(session.created_at, created_at);
        assert_eq!(session.role.as_deref(), Some("translator"));
        let messages = store.messages("abc").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "3");
        assert_eq!(messages[0].content, "c");
    }

    #[test]
    fn save_messages_creates_ad_hoc_session() {
        let mut store = SessionStore::in_memory();
        store.save_messages("new", vec![message("1", "hi")]);
        assert!(store.session("new").unwrap().is_ad_hoc());
        assert_eq!(store.role("new"), None);
    }

    #[test]
    fn delete_single_message_preserves_order() {
        let mut store = SessionStore::in_memory();
        store.save_messages(
            "abc",
            vec![message("1", "a"), message("2", "b"), message("3", "c")],
        );
        store.delete_message("abc", Some("2"));
        let ids: Vec<&str> = store
            .messages("abc")
            .unwrap()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);

        store.delete_message("abc", Some("missing"));
        store.delete_message("nope", Some("1"));
        assert_eq!(store.messages("abc").unwrap().len(), 2);
    }

    #[test]
    fn delete_whole_session() {
        let mut store = SessionStore::in_memory();
        store.save_messages("abc", vec![message("1", "a")]);
        store.delete_message("abc", None);
        assert!(store.session("abc").is_none());
        store.delete_message("abc", None);
    }

    #[test]
    fn unknown_ids_return_none() {
        let store = SessionStore::in_memory();
        assert!(store.session("ghost").is_none());
        assert!(store.messages("ghost").is_none());
        assert!(store.role("ghost").is_none());
    }

    #[test]
    fn prompt_fallback_and_override() {
        let mut store = SessionStore::in_memory();
        let default = store.prompt(Some(DEFAULT_ROLE)).to_string();
        assert_eq!(store.prompt(Some("pirate")), default);
        assert_eq!(store.prompt(None), default);

        store.update_prompt("pirate", "Arr.");
        assert_eq!(store.prompt(Some("pirate")), "Arr.");
        store.update_prompt(DEFAULT_ROLE, "Be brief.");
        assert_eq!(store.prompt(Some("unknown")), "Be brief.");
    }

    #[test]
    fn reset_keeps_user_settings() {
        let mut store = SessionStore::in_memory();
        store.set_user_name("Lan");
        store.set_selected_model(Some("gemini-pro".to_string()));
        store.set_initialized(true);
        store.update_prompt("developer", "Use Rust.");
        store.save_messages("abc", vec![message("1", "a")]);
        store.set_current_chat_id(Some("abc".to_string()));
        store.push_pending_image(Attachment::new("data:image/png;base64,AAAA"));

        store.reset();
        assert_eq!(store.sessions().count(), 0);
        assert_eq!(store.current_chat_id(), None);
        assert!(store.pending_images().is_empty());
        assert_eq!(store.user_name(), "Lan");
        assert_eq!(store.selected_model(), Some("gemini-pro"));
        assert!(store.is_initialized());
        assert_eq!(store.prompt(Some("developer")), "Use Rust.");
    }

    #[test]
    fn round_trip_excludes_transient_state() {
        let storage = MemoryStorage::new();
        let mut store = SessionStore::fresh(storage.clone());
        store.set_user_name("Lan");
        store.set_selected_model(Some("gemini-pro".to_string()));
        store.set_initialized(true);
        store.update_prompt("developer", "Use Rust.");
        store.create_session("dev-code", Some("developer"));
        store.save_messages("dev-code", vec![message("1", "a")]);
        store.set_current_chat_id(Some("dev-code".to_string()));
        store.push_pending_image(Attachment::new("https://example.com/cat.png"));
        let _ticket = store.begin_turn("dev-code").unwrap();

        let reloaded = SessionStore::open(storage).unwrap();
        assert_eq!(reloaded.state(), store.state());
        assert!(reloaded.pending_images().is_empty());
        assert!(!reloaded.is_in_flight("dev-code"));
    }

    #[test]
    fn translator_thread_survives_reload() {
        let storage = MemoryStorage::new();
        let mut store = SessionStore::fresh(storage.clone());
        store.create_session("abc", Some("translator"));
        store.save_messages(
            "abc",
            vec![Message::user("Hello"), Message::assistant("Xin chào")],
        );

        let reloaded = SessionStore::open(storage).unwrap();
        assert_eq!(reloaded.role("abc"), Some("translator"));
        let messages = reloaded.messages("abc").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(
            reloaded.prompt(reloaded.role("abc")),
            SystemPromptTable::shipped().get(Some("translator"))
        );
    }

    #[test]
    fn open_or_fresh_reports_corrupt_blob() {
        let (store, err) = SessionStore::open_or_fresh(MemoryStorage::with_blob("garbage"));
        assert!(err.is_some());
        assert_eq!(store.sessions().count(), 0);
        assert!(SessionStore::open(MemoryStorage::with_blob("garbage")).is_err());

        let (_, err) = SessionStore::open_or_fresh(MemoryStorage::new());
        assert!(err.is_none());
    }

    #[test]
    fn persist_failure_is_reported_not_returned() {
        let storage = MemoryStorage::new();
        let mut store = SessionStore::fresh(storage.clone());
        let changes = recorder(&mut store);
        storage.fail_saves(true);

        store.set_user_name("Lan");
        assert_eq!(store.user_name(), "Lan");
        let changes = changes.lock().unwrap();
        assert!(matches!(changes[0], StoreChange::PersistFailed { .. }));
        assert_eq!(changes[1], StoreChange::UserNameChanged("Lan".to_string()));
        assert_eq!(storage.blob(), None);
    }

    #[test]
    fn observers_see_changes_until_unsubscribed() {
        let mut store = SessionStore::in_memory();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let id = store.subscribe(Box::new(move |change: &StoreChange| {
            sink.lock().unwrap().push(change.clone());
        }));

        store.create_session("abc", None);
        store.save_messages("abc", vec![message("1", "a")]);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.delete_message("abc", None);

        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                StoreChange::SessionCreated {
                    id: "abc".to_string()
                },
                StoreChange::MessagesSaved {
                    id: "abc".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn in_flight_guard() {
        let mut store = SessionStore::in_memory();
        let ticket = store.begin_turn("abc").unwrap();
        assert_eq!(ticket.chat_id(), "abc");
        assert!(store.is_in_flight("abc"));
        assert!(store.begin_turn("abc").unwrap_err().is_busy());
        let other = store.begin_turn("other").unwrap();
        store.end_turn(ticket);
        assert!(!store.is_in_flight("abc"));
        assert!(store.is_in_flight("other"));
        let _again = store.begin_turn("abc").unwrap();
        drop(other);
    }

    #[test]
    fn dropped_ticket_frees_thread() {
        let mut store = SessionStore::in_memory();
        let ticket = store.begin_turn("abc").unwrap();
        let watch = ticket.watch();
        drop(ticket);
        assert!(watch.upgrade().is_none());
        assert!(!store.is_in_flight("abc"));
        let _ticket = store.begin_turn("abc").unwrap();
        assert!(store.is_in_flight("abc"));
    }

    #[test]
    fn take_pending_images_empties_queue() {
        let mut store = SessionStore::in_memory();
        store.set_pending_images(vec![Attachment::new("a.png"), Attachment::new("b.png")]);
        assert_eq!(store.take_pending_images().len(), 2);
        assert!(store.take_pending_images().is_empty());
    }
}
