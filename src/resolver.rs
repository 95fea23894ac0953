//! # Message resolver
//!
//! Correlates an inbound raw message to a pending outstanding request. When
//! the sender/channel pair has an `awaiting` record, the message content is
//! written back as the resolution and the waiting promise is woken. When it
//! has no record (or a stale one), the message is the start of a new flow.

use tracing::{error, info};

use crate::promise::RequestWaker;
use crate::service::InboundMessage;
use crate::state::{RequestRecord, RequestStatus, StateManager};

#[derive(Clone)]
pub struct MessageResolver {
    state: StateManager,
    waker: RequestWaker,
}

impl MessageResolver {
    pub fn new(state: StateManager, waker: RequestWaker) -> Self {
        Self { state, waker }
    }

    /// Returns `true` when the message was consumed as the answer to a
    /// pending request. `false` means the caller should treat it as the
    /// start of a new flow; store errors are logged and reported as `false`
    /// so one bad read never wedges the conversation.
    pub async fn resolve_message(&self, message: &InboundMessage) -> bool {
        match self.try_resolve(message).await {
            Ok(resolved) => resolved,
            Err(err) => {
                error!("Error resolving message: {err:#}");
                false
            }
        }
    }

    async fn try_resolve(&self, message: &InboundMessage) -> anyhow::Result<bool> {
        let Some(key) = self
            .state
            .get_open_request_key(&message.author_id, &message.channel_id)
            .await?
        else {
            return Ok(false);
        };

        let record = self.state.get_request_data(&key).await?;
        match record {
            Some(record) if record.status == RequestStatus::Awaiting => {
                self.state
                    .set_request_data(&key, &RequestRecord::resolved(message.content.clone()))
                    .await?;
                info!("Resolved message for request: {key}");
                self.waker.wake(&key);
                Ok(true)
            }
            // Stale or malformed leftovers (e.g. from a crash) are deleted
            // so the message can start a fresh flow.
            _ => {
                self.state.delete_request_data(&key).await?;
                Ok(false)
            }
        }
    }
}
