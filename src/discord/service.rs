//! `ChatService` over the Discord REST API.

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use serenity::builder::{CreateActionRow, CreateButton, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::application::ButtonStyle;
use serenity::model::id::{ChannelId, MessageId};
use std::sync::Arc;

use crate::service::{ChatService, RenderedButton};

pub struct DiscordChat {
    http: Arc<Http>,
}

impl DiscordChat {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn channel(channel_id: &str) -> Result<ChannelId> {
    let raw: u64 = channel_id
        .parse()
        .with_context(|| format!("Invalid channel id: {channel_id}"))?;
    if raw == 0 {
        bail!("Invalid channel id: 0");
    }
    Ok(ChannelId::new(raw))
}

#[async_trait]
impl ChatService for DiscordChat {
    async fn send_text(&self, channel_id: &str, content: &str) -> Result<String> {
        let message = channel(channel_id)?
            .send_message(&self.http, CreateMessage::new().content(content))
            .await
            .with_context(|| format!("Failed to send message to channel {channel_id}"))?;
        Ok(message.id.to_string())
    }

    async fn send_buttons(&self, channel_id: &str, rows: &[Vec<RenderedButton>]) -> Result<()> {
        let components: Vec<CreateActionRow> = rows
            .iter()
            .map(|row| {
                CreateActionRow::Buttons(
                    row.iter()
                        .map(|button| {
                            CreateButton::new(&button.custom_id)
                                .label(&button.label)
                                .style(ButtonStyle::Primary)
                        })
                        .collect(),
                )
            })
            .collect();

        channel(channel_id)?
            .send_message(&self.http, CreateMessage::new().components(components))
            .await
            .with_context(|| format!("Failed to send buttons to channel {channel_id}"))?;
        Ok(())
    }

    async fn edit_text(&self, channel_id: &str, message_id: &str, content: &str) -> Result<()> {
        let message_id = MessageId::new(
            message_id
                .parse()
                .with_context(|| format!("Invalid message id: {message_id}"))?,
        );
        channel(channel_id)?
            .edit_message(&self.http, message_id, EditMessage::new().content(content))
            .await
            .with_context(|| format!("Failed to edit message {message_id} in {channel_id}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_must_be_a_nonzero_snowflake() {
        assert!(channel("123456789").is_ok());
        assert!(channel("0").is_err());
        assert!(channel("general").is_err());
    }
}
