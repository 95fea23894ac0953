//! # Discord adapter
//!
//! Binds the transport-agnostic engine to Discord through serenity:
//! [`DiscordChat`] implements the outbound `ChatService`, the gateway
//! handler feeds inbound events to the listeners, and [`ChatApp`] wires it
//! all together.

mod handler;
mod service;

pub use service::DiscordChat;

use anyhow::{Context as _, Result};
use serenity::client::Client;
use serenity::http::Http;
use serenity::model::gateway::GatewayIntents;
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::listener::{ChatListener, ListenerProps};
use crate::service::ChatService;
use crate::state::StateManager;
use crate::store::{MemoryStore, StateStore};

use handler::Handler;

/// Top-level application: one Discord connection, any number of listeners.
///
/// ```no_run
/// # use chatflow::{ChatApp, EngineConfig, ListenerProps, Responder, step};
/// # async fn run() -> anyhow::Result<()> {
/// let mut app = ChatApp::in_memory("the-bot-token", EngineConfig::default());
/// app.add_listener(ListenerProps::channel(
///     "123456789",
///     vec![step(|_ctx, res: Responder, _next| async move {
///         let name = res.request_data(Some("What's your name?")).await?;
///         res.send(&format!("Hello, {}!", name.response)).await?;
///         Ok(())
///     })],
/// ))?;
/// app.run().await
/// # }
/// ```
pub struct ChatApp {
    token: String,
    config: EngineConfig,
    state: StateManager,
    listeners: Vec<ListenerProps>,
}

impl ChatApp {
    pub fn new(
        token: impl Into<String>,
        config: EngineConfig,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            token: token.into(),
            config,
            state: StateManager::new(store),
            listeners: Vec::new(),
        }
    }

    /// Process-local state only; pending exchanges do not survive restarts.
    pub fn in_memory(token: impl Into<String>, config: EngineConfig) -> Self {
        Self::new(token, config, Arc::new(MemoryStore::new()))
    }

    /// Backed by the Redis instance from the configured URL.
    #[cfg(feature = "redis")]
    pub async fn with_redis(token: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let store = crate::store::RedisStore::connect(&config.redis_url).await?;
        Ok(Self::new(token, config, Arc::new(store)))
    }

    /// Listener scoping is validated here, before the connection starts.
    pub fn add_listener(&mut self, props: ListenerProps) -> Result<()> {
        props.validate()?;
        self.listeners.push(props);
        Ok(())
    }

    /// Connects to the gateway and blocks until the client stops.
    pub async fn run(self) -> Result<()> {
        let http = Arc::new(Http::new(&self.token));
        let chat: Arc<dyn ChatService> = Arc::new(DiscordChat::new(http));

        let listeners = self
            .listeners
            .into_iter()
            .map(|props| {
                ChatListener::new(props, chat.clone(), self.state.clone(), &self.config)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Starting with {} listener(s)", listeners.len());

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents)
            .event_handler(Handler { listeners })
            .await
            .context("Failed to build the Discord client")?;
        client
            .start()
            .await
            .context("The Discord client stopped with an error")
    }
}
