//! Data types shared by the store, the client and the conversation.

mod chat_request;
mod chat_session;
mod message;
mod model_list;
mod stream_part;

pub use chat_request::{ChatRequest, ContentPart, CoreContent, CoreMessage, RequestData};
pub use chat_session::ChatSession;
pub use message::{Attachment, Message, MessageRole};
pub use model_list::{ModelListResponse, ModelTag};
pub use stream_part::StreamPart;
