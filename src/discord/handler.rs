//! Serenity gateway handler fanning events out to the bound listeners.

use serenity::async_trait;
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::client::{Context, EventHandler};
use serenity::model::application::{ComponentInteractionDataKind, Interaction};
use serenity::model::channel::{Channel, GuildChannel, Message};
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use std::sync::Arc;
use tracing::{info, warn};

use crate::listener::ChatListener;
use crate::service::{ButtonClick, ChannelCreated, InboundMessage};
use crate::strings;

pub(crate) struct Handler {
    pub listeners: Vec<Arc<ChatListener>>,
}

/// Category id for regular guild channels, parent channel id for threads.
async fn parent_of(ctx: &Context, channel_id: ChannelId) -> Option<String> {
    match channel_id.to_channel(ctx).await {
        Ok(Channel::Guild(channel)) => channel.parent_id.map(|id| id.to_string()),
        _ => None,
    }
}

fn created_event(channel: &GuildChannel) -> ChannelCreated {
    ChannelCreated {
        channel_id: channel.id.to_string(),
        name: channel.name.clone(),
        parent_id: channel.parent_id.map(|id| id.to_string()),
        is_thread: channel.thread_metadata.is_some(),
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Connected to Discord as {}", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let inbound = InboundMessage {
            author_id: msg.author.id.to_string(),
            channel_id: msg.channel_id.to_string(),
            content: msg.content.clone(),
            author_is_bot: msg.author.bot,
            guild_id: msg.guild_id.map(|id| id.to_string()),
            parent_id: parent_of(&ctx, msg.channel_id).await,
        };

        // A flow execution suspends while it awaits replies, so each
        // listener gets its own task; later messages must keep flowing
        // through this handler to resolve those waits.
        for listener in &self.listeners {
            let listener = listener.clone();
            let inbound = inbound.clone();
            tokio::spawn(async move {
                listener.on_message(&inbound).await;
            });
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Component(component) = interaction else {
            return;
        };
        if !matches!(component.data.kind, ComponentInteractionDataKind::Button) {
            return;
        }

        let click = ButtonClick {
            custom_id: component.data.custom_id.clone(),
            user_id: component.user.id.to_string(),
            channel_id: component.channel_id.to_string(),
        };

        for listener in &self.listeners {
            if let Some(label) = listener.on_button(&click) {
                let response = CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(strings::you_selected(&label))
                        .ephemeral(true),
                );
                if let Err(err) = component.create_response(&ctx.http, response).await {
                    warn!("Failed to acknowledge button click: {err}");
                }
                return;
            }
        }

        // A click on an already-consumed or foreign group. Acknowledge it so
        // Discord does not show an "interaction failed" banner.
        let _ = component
            .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
            .await;
    }

    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        let created = created_event(&channel);
        for listener in &self.listeners {
            listener.on_channel_create(&created).await;
        }
    }

    async fn thread_create(&self, _ctx: Context, thread: GuildChannel) {
        let created = created_event(&thread);
        for listener in &self.listeners {
            listener.on_thread_create(&created).await;
        }
    }
}
