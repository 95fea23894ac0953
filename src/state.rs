//! # State manager
//!
//! Typed facade over the raw store. Two families of entries:
//! - `chat:{channel_id}`: accumulated answers/selections of one flow.
//! - `request:{user_id}:{channel_id}`: the marker of one outstanding
//!   question/answer exchange.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::StateStore;

/// Conversation-scoped bag of accumulated answers. Steps decide the shape;
/// the engine only merges and stores it.
pub type ChatData = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Awaiting,
    Resolved,
}

/// Persisted marker of a single question/answer exchange. Created as
/// `Awaiting` when a step asks for input, flipped to `Resolved` by the
/// message resolver, deleted once consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub status: RequestStatus,
    #[serde(default)]
    pub response: String,
}

impl RequestRecord {
    pub fn awaiting() -> Self {
        Self {
            status: RequestStatus::Awaiting,
            response: String::new(),
        }
    }

    pub fn resolved(response: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Resolved,
            response: response.into(),
        }
    }
}

pub const REQUEST_KEY_PREFIX: &str = "request:";
const CHAT_KEY_PREFIX: &str = "chat:";

/// Canonical key of the request record for one user in one channel.
pub fn request_key(user_id: &str, channel_id: &str) -> String {
    format!("{REQUEST_KEY_PREFIX}{user_id}:{channel_id}")
}

/// Accepts keys with or without the `request:` prefix.
pub fn normalize_request_key(key: &str) -> String {
    if key.starts_with(REQUEST_KEY_PREFIX) {
        key.to_string()
    } else {
        format!("{REQUEST_KEY_PREFIX}{key}")
    }
}

#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn StateStore>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn chat_key(channel_id: &str) -> String {
        format!("{CHAT_KEY_PREFIX}{channel_id}")
    }

    pub async fn get_chat_data(&self, channel_id: &str) -> Result<Option<ChatData>> {
        let raw = self.store.get(&Self::chat_key(channel_id)).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Corrupt chat data")?,
            )),
            None => Ok(None),
        }
    }

    /// Full replace of the chat data for one conversation.
    pub async fn set_chat_data(&self, channel_id: &str, data: &ChatData) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.store.set(&Self::chat_key(channel_id), &json).await
    }

    /// Shallow-merges `patch` onto the existing chat data (created on first
    /// write) and returns the merged result.
    pub async fn update_chat_data(&self, channel_id: &str, patch: ChatData) -> Result<ChatData> {
        let mut data = self.get_chat_data(channel_id).await?.unwrap_or_default();
        for (key, value) in patch {
            data.insert(key, value);
        }
        self.set_chat_data(channel_id, &data).await?;
        Ok(data)
    }

    /// Read-modify-write with a caller-supplied function. The function
    /// receives the current data and must return the new full data; nothing
    /// is merged on its behalf.
    pub async fn update_chat_data_with<F>(&self, channel_id: &str, update: F) -> Result<ChatData>
    where
        F: FnOnce(ChatData) -> ChatData + Send,
    {
        let current = self.get_chat_data(channel_id).await?.unwrap_or_default();
        let data = update(current);
        self.set_chat_data(channel_id, &data).await?;
        Ok(data)
    }

    /// Typed view over the chat data. Flows that define a concrete record
    /// type get schema checking on every read instead of an open map.
    pub async fn get_chat_data_as<T: DeserializeOwned>(
        &self,
        channel_id: &str,
    ) -> Result<Option<T>> {
        let raw = self.store.get(&Self::chat_key(channel_id)).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Chat data does not match the flow's type")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn set_chat_data_as<T: Serialize>(&self, channel_id: &str, data: &T) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.store.set(&Self::chat_key(channel_id), &json).await
    }

    /// `key` must be a full `request:`-prefixed key.
    pub async fn get_request_data(&self, key: &str) -> Result<Option<RequestRecord>> {
        let raw = self.store.get(key).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Corrupt request record")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn set_request_data(&self, key: &str, record: &RequestRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.store.set(key, &json).await
    }

    pub async fn delete_request_data(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    /// Returns the canonical request key for the sender/channel pair when an
    /// outstanding record exists.
    pub async fn get_open_request_key(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Option<String>> {
        let key = request_key(user_id, channel_id);
        if self.store.exists(&key).await? {
            Ok(Some(key))
        } else {
            Ok(None)
        }
    }
}
