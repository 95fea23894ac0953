//! # Chat service
//!
//! Abstract interface over the chat transport plus the transport-agnostic
//! event types the engine consumes. The serenity implementation lives in
//! `discord`; tests use an in-memory mock.

use anyhow::Result;
use async_trait::async_trait;

/// One button as handed to the transport: the correlation id is already a
/// process-local random id, never the caller-supplied option id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedButton {
    pub custom_id: String,
    pub label: String,
}

/// An inbound text message, stripped down to what the engine needs.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub author_id: String,
    pub channel_id: String,
    pub content: String,
    pub author_is_bot: bool,
    pub guild_id: Option<String>,
    /// Category id for guild channels, parent channel id for threads.
    pub parent_id: Option<String>,
}

/// A button/interactive-component activation.
#[derive(Debug, Clone)]
pub struct ButtonClick {
    pub custom_id: String,
    pub user_id: String,
    pub channel_id: String,
}

/// A channel or thread created within a watched scope.
#[derive(Debug, Clone)]
pub struct ChannelCreated {
    pub channel_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub is_thread: bool,
}

/// Outbound capabilities the engine needs from the transport.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Sends a plain text message and returns the message id.
    async fn send_text(&self, channel_id: &str, content: &str) -> Result<String>;

    /// Renders one message carrying up to five rows of buttons.
    async fn send_buttons(&self, channel_id: &str, rows: &[Vec<RenderedButton>]) -> Result<()>;

    /// Edits a previously sent message.
    async fn edit_text(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()>;
}
