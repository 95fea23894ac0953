//! # Chat listener
//!
//! Binds one flow to a slice of the chat surface: a fixed channel, or every
//! channel under a category. Inbound messages are first offered to the
//! message resolver; whatever it does not consume starts a new flow
//! execution.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::buttons::ButtonRouter;
use crate::config::EngineConfig;
use crate::flow::{FlowExecutor, RequestContext, Step, TimeoutCallback, timeout_notice};
use crate::promise::PromiseManager;
use crate::resolver::MessageResolver;
use crate::service::{ButtonClick, ChannelCreated, ChatService, InboundMessage};
use crate::state::StateManager;
use crate::strings;

/// Fired when a channel or thread appears inside the listener's watched
/// category, e.g. to greet the channel with the flow's opening message.
pub type ChannelCreateCallback =
    Arc<dyn Fn(ChannelCreated, Arc<dyn ChatService>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Declarative description of one listener. Exactly one of `channel_id` /
/// `category_id` scopes it; a category scope requires `on_channel_create`
/// so newly created channels get an opening.
pub struct ListenerProps {
    pub channel_id: Option<String>,
    pub category_id: Option<String>,
    pub chain: Vec<Step>,
    pub on_timeout: Option<TimeoutCallback>,
    pub on_channel_create: Option<ChannelCreateCallback>,
    pub on_thread_create: Option<ChannelCreateCallback>,
}

impl ListenerProps {
    pub fn channel(channel_id: impl Into<String>, chain: Vec<Step>) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            category_id: None,
            chain,
            on_timeout: None,
            on_channel_create: None,
            on_thread_create: None,
        }
    }

    pub fn category(category_id: impl Into<String>, chain: Vec<Step>) -> Self {
        Self {
            channel_id: None,
            category_id: Some(category_id.into()),
            chain,
            on_timeout: None,
            on_channel_create: None,
            on_thread_create: None,
        }
    }

    pub fn on_timeout(mut self, callback: TimeoutCallback) -> Self {
        self.on_timeout = Some(callback);
        self
    }

    pub fn on_channel_create(mut self, callback: ChannelCreateCallback) -> Self {
        self.on_channel_create = Some(callback);
        self
    }

    pub fn on_thread_create(mut self, callback: ChannelCreateCallback) -> Self {
        self.on_thread_create = Some(callback);
        self
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.channel_id.is_none() && self.category_id.is_none() {
            anyhow::bail!("listener needs a channel_id or a category_id");
        }
        if self.category_id.is_some() && self.on_channel_create.is_none() {
            anyhow::bail!("category-scoped listener needs an on_channel_create callback");
        }
        Ok(())
    }
}

/// One bound listener with its own executor, promise manager and button
/// router. Stateless across events apart from what lives in the store.
pub struct ChatListener {
    chat: Arc<dyn ChatService>,
    state: StateManager,
    resolver: MessageResolver,
    executor: FlowExecutor,
    buttons: Arc<ButtonRouter>,
    channel_id: Option<String>,
    category_id: Option<String>,
    on_channel_create: Option<ChannelCreateCallback>,
    on_thread_create: Option<ChannelCreateCallback>,
}

impl ChatListener {
    pub fn new(
        props: ListenerProps,
        chat: Arc<dyn ChatService>,
        state: StateManager,
        config: &EngineConfig,
    ) -> anyhow::Result<Self> {
        props.validate()?;

        let promises = PromiseManager::new(state.clone(), config.polling_interval());
        let resolver = MessageResolver::new(state.clone(), promises.waker());
        let buttons = Arc::new(ButtonRouter::new());
        let on_timeout = props
            .on_timeout
            .unwrap_or_else(|| timeout_notice(strings::TIMEOUT_NOTICE));
        let executor = FlowExecutor::new(
            props.chain,
            promises,
            buttons.clone(),
            Duration::from_millis(config.request_timeout_ms),
            on_timeout,
        );

        Ok(Self {
            chat,
            state,
            resolver,
            executor,
            buttons,
            channel_id: props.channel_id,
            category_id: props.category_id,
            on_channel_create: props.on_channel_create,
            on_thread_create: props.on_thread_create,
        })
    }

    fn in_scope(&self, channel_id: &str, parent_id: Option<&str>) -> bool {
        if let Some(watched) = &self.category_id {
            return parent_id == Some(watched.as_str());
        }
        if let Some(watched) = &self.channel_id {
            return channel_id == watched;
        }
        false
    }

    /// Routes one inbound message. Bot authors and out-of-scope channels are
    /// ignored; a message answering a pending request is consumed by the
    /// resolver; anything else starts a new flow execution and drives it to
    /// completion. Timeouts and discards end the flow quietly.
    pub async fn on_message(&self, message: &InboundMessage) {
        if message.author_is_bot {
            return;
        }
        if !self.in_scope(&message.channel_id, message.parent_id.as_deref()) {
            return;
        }

        if self.resolver.resolve_message(message).await {
            return;
        }

        info!(
            channel = %message.channel_id,
            user = %message.author_id,
            "starting flow"
        );
        let ctx = Arc::new(RequestContext {
            user_id: message.author_id.clone(),
            channel_id: message.channel_id.clone(),
            guild_id: message.guild_id.clone(),
            content: message.content.clone(),
            chat: self.chat.clone(),
            state: self.state.clone(),
        });
        if let Err(err) = self.executor.execute(ctx).await {
            if err.is_expected() {
                debug!(channel = %message.channel_id, "flow ended: {err}");
            } else {
                error!(channel = %message.channel_id, "unhandled flow error: {err:#}");
            }
        }
    }

    /// Routes a button click to this listener's pending groups. Returns the
    /// clicked label so the transport can acknowledge the interaction, or
    /// `None` when the click belongs to another listener (or nothing).
    pub fn on_button(&self, click: &ButtonClick) -> Option<String> {
        self.buttons.resolve(click)
    }

    pub async fn on_channel_create(&self, created: &ChannelCreated) {
        if let Some(callback) = &self.on_channel_create {
            if self.in_scope(&created.channel_id, created.parent_id.as_deref()) {
                callback(created.clone(), self.chat.clone()).await;
            }
        }
    }

    pub async fn on_thread_create(&self, created: &ChannelCreated) {
        if let Some(callback) = &self.on_thread_create {
            // A thread's parent is a channel; the watched channel scope
            // applies to that parent.
            let parent = created.parent_id.as_deref().unwrap_or_default();
            let watched = self.channel_id.as_deref() == Some(parent)
                || self.in_scope(&created.channel_id, created.parent_id.as_deref());
            if watched {
                callback(created.clone(), self.chat.clone()).await;
            }
        }
    }
}
