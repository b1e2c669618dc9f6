//! The conversation turn state machine.
//!
//! A [`Conversation`] drives one thread: it sends the thread's history plus the new user turn
//! to a [`ChatBackend`], renders fragments as they arrive, and writes the finished exchange
//! back to the [`SessionStore`].  Nothing reaches the store until the response completes; a
//! failed, cancelled or abandoned turn leaves the store exactly as it found it.
//!
//! Dropping a turn's future mid-stream abandons it: the thread's in-flight mark goes with the
//! future and the conversation reads as [`TurnState::Idle`] again.
//!
//! ```text
//! Idle -> Submitting -> Streaming -> Committed
//!              |            |
//!              +------------+-> Failed -> Idle
//! ```

use std::sync::Weak;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::ChatBackend;
use crate::error::{Error, Result};
use crate::observability::{TURNS_COMMITTED, TURNS_FAILED, TURNS_REJECTED_BUSY};
use crate::render::Renderer;
use crate::store::{SessionStore, TurnTicket};
use crate::types::{ChatRequest, Message, MessageRole};

/// Where the current turn stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    /// No turn has run, or the last failure was dismissed.
    #[default]
    Idle,
    /// The request is on its way; nothing has streamed yet.
    Submitting,
    /// Fragments are arriving.
    Streaming,
    /// The last turn completed and was saved.
    Committed,
    /// The last turn failed; the store is unchanged.
    Failed,
}

impl TurnState {
    /// True while a turn is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, TurnState::Submitting | TurnState::Streaming)
    }
}

/// View state of one thread.
#[derive(Debug)]
pub struct Conversation {
    chat_id: String,
    role: Option<String>,
    state: TurnState,
    buffer: String,
    last_error: Option<Error>,
    turn: Weak<()>,
}

impl Conversation {
    /// A conversation on thread `chat_id`.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            role: None,
            state: TurnState::Idle,
            buffer: String::new(),
            last_error: None,
            turn: Weak::new(),
        }
    }

    /// A conversation on a role-preset thread.
    ///
    /// If the thread does not exist yet when the first turn commits, it is created bound to
    /// `role`.
    pub fn for_role(chat_id: impl Into<String>, role: impl Into<String>) -> Self {
        let mut conversation = Self::new(chat_id);
        conversation.role = Some(role.into());
        conversation
    }

    /// The thread this conversation drives.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        if self.abandoned() {
            TurnState::Idle
        } else {
            self.state
        }
    }

    /// Text received so far in the current turn.
    pub fn buffer(&self) -> &str {
        if self.abandoned() { "" } else { &self.buffer }
    }

    /// A turn was started but its future was dropped before it finished.
    fn abandoned(&self) -> bool {
        self.state.is_busy() && self.turn.strong_count() == 0
    }

    /// The error that failed the last turn, until dismissed.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Acknowledge a failed turn.
    pub fn dismiss_error(&mut self) {
        if self.state == TurnState::Failed {
            self.state = TurnState::Idle;
            self.last_error = None;
        }
    }

    /// Send `text` as a new user turn and stream the reply.
    ///
    /// Attachments queued in the store go with the message and are dequeued only when the
    /// reply commits.  Returns the committed assistant message.
    pub async fn submit(
        &mut self,
        store: &mut SessionStore,
        backend: &dyn ChatBackend,
        text: &str,
        renderer: &mut dyn Renderer,
        cancel: CancellationToken,
    ) -> Result<Message> {
        let (model, ticket) = self.admit(store)?;
        let mut history = store
            .messages(&self.chat_id)
            .map(<[Message]>::to_vec)
            .unwrap_or_default();
        let images = store.pending_images().to_vec();
        let with_images = !images.is_empty();
        history.push(Message::user(text).with_attachments(images));
        self.run_turn(store, backend, model, ticket, history, with_images, renderer, cancel)
            .await
    }

    /// Ask again for the reply to the last user message.
    ///
    /// A trailing assistant message is dropped before the request; it is replaced only if the
    /// new reply commits.
    pub async fn retry(
        &mut self,
        store: &mut SessionStore,
        backend: &dyn ChatBackend,
        renderer: &mut dyn Renderer,
        cancel: CancellationToken,
    ) -> Result<Message> {
        let Some(messages) = store.messages(&self.chat_id) else {
            return Err(Error::chat_not_found(&self.chat_id));
        };
        let mut history = messages.to_vec();
        if history.last().map(|m| m.role) == Some(MessageRole::Assistant) {
            history.pop();
        }
        if history.last().map(|m| m.role) != Some(MessageRole::User) {
            return Err(Error::validation(
                "there is no user message to retry",
                None,
            ));
        }
        let (model, ticket) = self.admit(store)?;
        self.run_turn(store, backend, model, ticket, history, false, renderer, cancel)
            .await
    }

    /// Remove one message from the thread.
    pub fn delete_message(&mut self, store: &mut SessionStore, message_id: &str) -> Result<()> {
        if self.state().is_busy() || store.is_in_flight(&self.chat_id) {
            return Err(Error::busy(&self.chat_id));
        }
        let exists = store
            .messages(&self.chat_id)
            .is_some_and(|messages| messages.iter().any(|m| m.id == message_id));
        if !exists {
            return Err(Error::not_found(
                "no such message",
                Some("message".to_string()),
                Some(message_id.to_string()),
            ));
        }
        store.delete_message(&self.chat_id, Some(message_id));
        Ok(())
    }

    /// Check that a turn may start and mark it in flight.  Returns the model to use.
    fn admit(&mut self, store: &mut SessionStore) -> Result<(String, TurnTicket)> {
        if self.state().is_busy() {
            TURNS_REJECTED_BUSY.click();
            return Err(Error::busy(&self.chat_id));
        }
        let Some(model) = store.selected_model().map(String::from) else {
            return Err(Error::validation(
                "no model selected",
                Some("selectedModel".to_string()),
            ));
        };
        match store.begin_turn(&self.chat_id) {
            Ok(ticket) => {
                self.turn = ticket.watch();
                Ok((model, ticket))
            }
            Err(err) => {
                TURNS_REJECTED_BUSY.click();
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &mut self,
        store: &mut SessionStore,
        backend: &dyn ChatBackend,
        model: String,
        ticket: TurnTicket,
        mut history: Vec<Message>,
        with_images: bool,
        renderer: &mut dyn Renderer,
        cancel: CancellationToken,
    ) -> Result<Message> {
        let role = store
            .role(&self.chat_id)
            .map(String::from)
            .or_else(|| self.role.clone());
        let system = store.prompt(role.as_deref()).to_string();
        let vision = backend.supports_vision(&model);

        self.state = TurnState::Submitting;
        self.buffer.clear();
        self.last_error = None;

        let outcome = match ChatRequest::build(&history, system, role.as_deref(), model, vision)
        {
            Some(request) => self.stream_reply(backend, &request, renderer, cancel).await,
            None => Err(Error::validation("cannot send an empty history", None)),
        };
        store.end_turn(ticket);

        match outcome {
            Ok(text) => {
                let reply = Message::assistant(text);
                history.push(reply.clone());
                if store.session(&self.chat_id).is_none()
                    && let Some(role) = role.as_deref()
                {
                    store.create_session(&self.chat_id, Some(role));
                }
                store.save_messages(&self.chat_id, history);
                if with_images {
                    store.set_pending_images(Vec::new());
                }
                self.state = TurnState::Committed;
                TURNS_COMMITTED.click();
                renderer.finish_response();
                Ok(reply)
            }
            Err(err) => {
                self.state = TurnState::Failed;
                self.buffer.clear();
                TURNS_FAILED.click();
                if err.is_abort() {
                    renderer.print_interrupted();
                } else {
                    renderer.print_error(&err.user_message());
                }
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn stream_reply(
        &mut self,
        backend: &dyn ChatBackend,
        request: &ChatRequest,
        renderer: &mut dyn Renderer,
        cancel: CancellationToken,
    ) -> Result<String> {
        let mut stream = backend.stream_chat(request, cancel.clone()).await?;
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if self.state == TurnState::Submitting {
                self.state = TurnState::Streaming;
                renderer.start_response();
            }
            renderer.print_text(&fragment);
            self.buffer.push_str(&fragment);
            if renderer.should_interrupt() {
                cancel.cancel();
            }
        }
        Ok(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::error::GENERIC_USER_MESSAGE;
    use crate::stream::{StreamFormat, TextStream, text_stream};
    use crate::types::Attachment;

    /// Replays canned body chunks, optionally failing or stalling after them.
    struct FakeBackend {
        chunks: Vec<&'static str>,
        fail_after: bool,
        stall_after: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeBackend {
        fn new(chunks: Vec<&'static str>) -> Self {
            Self {
                chunks,
                fail_after: false,
                stall_after: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(chunks: Vec<&'static str>) -> Self {
            Self {
                fail_after: true,
                ..Self::new(chunks)
            }
        }

        fn stalling(chunks: Vec<&'static str>) -> Self {
            Self {
                stall_after: true,
                ..Self::new(chunks)
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for FakeBackend {
        async fn stream_chat(
            &self,
            request: &ChatRequest,
            cancel: CancellationToken,
        ) -> Result<TextStream> {
            self.requests.lock().unwrap().push(request.clone());
            let mut items: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            if self.fail_after {
                items.push(Err(Error::streaming("connection reset", None)));
            }
            if self.stall_after {
                let body = stream::iter(items).chain(stream::pending());
                return Ok(text_stream(body, StreamFormat::Text, cancel));
            }
            Ok(text_stream(stream::iter(items), StreamFormat::Text, cancel))
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        text: String,
        errors: Vec<String>,
        interrupted: bool,
        interrupt_after: Option<usize>,
        fragments: usize,
    }

    impl Renderer for RecordingRenderer {
        fn print_text(&mut self, text: &str) {
            self.fragments += 1;
            self.text.push_str(text);
        }

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn print_info(&mut self, _: &str) {}

        fn finish_response(&mut self) {}

        fn print_interrupted(&mut self) {
            self.interrupted = true;
        }

        fn should_interrupt(&self) -> bool {
            self.interrupt_after
                .is_some_and(|limit| self.fragments >= limit)
        }
    }

    fn store_with_model() -> SessionStore {
        let mut store = SessionStore::in_memory();
        store.set_selected_model(Some("gemini-pro".to_string()));
        store
    }

    #[tokio::test]
    async fn fragments_commit_as_one_reply() {
        let mut store = store_with_model();
        let backend = FakeBackend::new(vec!["Hi", " there"]);
        let mut renderer = RecordingRenderer::default();
        let mut conversation = Conversation::new("abc");

        let reply = conversation
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut renderer,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.content, "Hi there");
        assert_eq!(renderer.text, "Hi there");
        assert_eq!(conversation.state(), TurnState::Committed);
        let messages = store.messages("abc").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert!(!store.is_in_flight("abc"));
    }

    #[tokio::test]
    async fn mid_stream_failure_leaves_store_untouched() {
        let mut store = store_with_model();
        store.save_messages(
            "abc",
            vec![Message::user("Earlier"), Message::assistant("Reply")],
        );
        let before = store.state().clone();
        let backend = FakeBackend::failing(vec!["Hi"]);
        let mut renderer = RecordingRenderer::default();
        let mut conversation = Conversation::new("abc");

        let err = conversation
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut renderer,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(store.state(), &before);
        assert_eq!(conversation.state(), TurnState::Failed);
        assert_eq!(conversation.buffer(), "");
        assert_eq!(renderer.errors, vec![GENERIC_USER_MESSAGE.to_string()]);
        assert!(!store.is_in_flight("abc"));

        conversation.dismiss_error();
        assert_eq!(conversation.state(), TurnState::Idle);
        assert!(conversation.last_error().is_none());
    }

    #[tokio::test]
    async fn request_carries_role_prompt_and_history() {
        let mut store = store_with_model();
        store.create_session("translate-english", Some("translator"));
        store.update_prompt("translator", "Translate to English.");
        store.save_messages(
            "translate-english",
            vec![Message::user("Xin chào"), Message::assistant("Hello")],
        );
        let backend = FakeBackend::new(vec!["Thanks"]);
        let mut conversation = Conversation::new("translate-english");

        conversation
            .submit(
                &mut store,
                &backend,
                "Cảm ơn",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let request = backend.last_request();
        assert_eq!(request.system, "Translate to English.");
        assert_eq!(request.role.as_deref(), Some("translator"));
        assert_eq!(request.selected_model, "gemini-pro");
        assert_eq!(request.messages.len(), 3);
        assert_eq!(store.role("translate-english"), Some("translator"));
        assert_eq!(store.messages("translate-english").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn role_thread_created_on_commit() {
        let mut store = store_with_model();
        let backend = FakeBackend::new(vec!["ok"]);
        let mut conversation = Conversation::for_role("dev-code", "developer");

        conversation
            .submit(
                &mut store,
                &backend,
                "fn main() {}",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(backend.last_request().role.as_deref(), Some("developer"));
        assert_eq!(store.role("dev-code"), Some("developer"));
    }

    #[tokio::test]
    async fn missing_model_is_rejected_without_change() {
        let mut store = SessionStore::in_memory();
        let backend = FakeBackend::new(vec!["never"]);
        let mut conversation = Conversation::new("abc");

        let err = conversation
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(conversation.state(), TurnState::Idle);
        assert!(store.session("abc").is_none());
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_thread_rejects_second_turn() {
        let mut store = store_with_model();
        let _ticket = store.begin_turn("abc").unwrap();
        let backend = FakeBackend::new(vec!["never"]);
        let mut conversation = Conversation::new("abc");

        let err = conversation
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_busy());
        assert_eq!(conversation.state(), TurnState::Idle);
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_turn_frees_thread() {
        let mut store = store_with_model();
        store.push_pending_image(Attachment::new("data:image/png;base64,AAAA"));
        let backend = FakeBackend::stalling(vec!["Hi"]);
        let mut renderer = RecordingRenderer::default();
        let mut conversation = Conversation::new("abc");

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            conversation.submit(
                &mut store,
                &backend,
                "Hello",
                &mut renderer,
                CancellationToken::new(),
            ),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(renderer.text, "Hi");

        assert!(!store.is_in_flight("abc"));
        assert!(store.session("abc").is_none());
        assert_eq!(store.pending_images().len(), 1);
        assert_eq!(conversation.state(), TurnState::Idle);
        assert_eq!(conversation.buffer(), "");

        let backend = FakeBackend::new(vec!["Hi there"]);
        let mut fresh = Conversation::new("abc");
        fresh
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(store.messages("abc").unwrap().len(), 2);
        assert!(store.pending_images().is_empty());

        conversation
            .submit(
                &mut store,
                &backend,
                "Again",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(conversation.state(), TurnState::Committed);
        assert_eq!(store.messages("abc").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn interrupt_discards_partial_reply() {
        let mut store = store_with_model();
        let backend = FakeBackend::new(vec!["one", "two", "three"]);
        let mut renderer = RecordingRenderer {
            interrupt_after: Some(1),
            ..Default::default()
        };
        let mut conversation = Conversation::new("abc");

        let err = conversation
            .submit(
                &mut store,
                &backend,
                "Hello",
                &mut renderer,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_abort());
        assert!(renderer.interrupted);
        assert_eq!(renderer.text, "one");
        assert!(store.session("abc").is_none());
        assert_eq!(conversation.state(), TurnState::Failed);
    }

    #[tokio::test]
    async fn retry_replaces_trailing_reply() {
        let mut store = store_with_model();
        store.save_messages(
            "abc",
            vec![
                Message::user("Hello").with_id("u1"),
                Message::assistant("Bad answer").with_id("a1"),
            ],
        );
        let backend = FakeBackend::new(vec!["Better answer"]);
        let mut conversation = Conversation::new("abc");

        conversation
            .retry(
                &mut store,
                &backend,
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(backend.last_request().messages.len(), 1);
        let messages = store.messages("abc").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "u1");
        assert_eq!(messages[1].content, "Better answer");
    }

    #[tokio::test]
    async fn retry_needs_a_user_message() {
        let mut store = store_with_model();
        let backend = FakeBackend::new(vec!["x"]);
        let mut conversation = Conversation::new("abc");
        let mut renderer = RecordingRenderer::default();

        let err = conversation
            .retry(&mut store, &backend, &mut renderer, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        store.save_messages("abc", vec![Message::assistant("Welcome")]);
        let err = conversation
            .retry(&mut store, &backend, &mut renderer, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!store.is_in_flight("abc"));
    }

    #[tokio::test]
    async fn failed_turn_restores_pending_images() {
        let mut store = store_with_model();
        store.push_pending_image(Attachment::new("data:image/png;base64,AAAA"));
        let backend = FakeBackend::failing(vec![]);
        let mut conversation = Conversation::new("abc");

        conversation
            .submit(
                &mut store,
                &backend,
                "Look",
                &mut RecordingRenderer::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(store.pending_images().len(), 1);
    }

    #[test]
    fn delete_message_by_id() {
        let mut store = store_with_model();
        store.save_messages(
            "abc",
            vec![
                Message::user("a").with_id("1"),
                Message::assistant("b").with_id("2"),
            ],
        );
        let mut conversation = Conversation::new("abc");
        conversation.delete_message(&mut store, "1").unwrap();
        assert_eq!(store.messages("abc").unwrap()[0].id, "2");
        assert!(
            conversation
                .delete_message(&mut store, "1")
                .unwrap_err()
                .is_not_found()
        );
    }
}
