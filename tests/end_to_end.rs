//! Full conversation through the public API: a listener bound to one
//! channel runs a two-question flow, the "user" answers over the same
//! message entry point, invalid answers are re-prompted.

use anyhow::Result;
use async_trait::async_trait;
use chatflow::{
    ChatListener, ChatService, CheckOutcome, EngineConfig, InboundMessage, InputKind,
    InputRequest, ListenerProps, MemoryStore, RenderedButton, Responder, StateManager, step,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingChat {
    sent: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for RecordingChat {
    async fn send_text(&self, _channel_id: &str, content: &str) -> Result<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(content.to_string());
        Ok(format!("msg-{}", sent.len()))
    }

    async fn send_buttons(&self, _channel_id: &str, _rows: &[Vec<RenderedButton>]) -> Result<()> {
        Ok(())
    }

    async fn edit_text(&self, _channel_id: &str, _message_id: &str, _content: &str) -> Result<()> {
        Ok(())
    }
}

fn message(content: &str) -> InboundMessage {
    InboundMessage {
        author_id: "user-1".to_string(),
        channel_id: "onboarding".to_string(),
        content: content.to_string(),
        author_is_bot: false,
        guild_id: Some("guild-1".to_string()),
        parent_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn onboarding_conversation_collects_validated_answers() {
    let chat = Arc::new(RecordingChat::default());
    let state = StateManager::new(Arc::new(MemoryStore::new()));

    let chain = vec![step(|ctx, res: Responder, _next| async move {
        let name = res.request_data(Some("What's your name?")).await?;
        ctx.update_chat_data(
            [("name".to_string(), json!(name.response))]
                .into_iter()
                .collect(),
        )
        .await?;

        let age = res
            .ask_for_input(
                InputRequest::text("How old are you?")
                    .kind(InputKind::Number)
                    .checker(|value| match value.as_number() {
                        Some(n) if n > 0.0 && n < 120.0 => CheckOutcome::Accept,
                        _ => CheckOutcome::Reject,
                    }),
            )
            .await?;
        ctx.update_chat_data([("age".to_string(), age.into_json())].into_iter().collect())
            .await?;

        res.send("All done!").await?;
        Ok(())
    })];

    let listener = Arc::new(
        ChatListener::new(
            ListenerProps::channel("onboarding", chain),
            chat.clone(),
            state.clone(),
            &EngineConfig::default(),
        )
        .unwrap(),
    );

    // The opening message starts the flow; it suspends awaiting replies.
    let flow = tokio::spawn({
        let listener = listener.clone();
        async move { listener.on_message(&message("hi there")).await }
    });

    // Each later message is consumed as the answer to the pending request.
    // Both waits key off the record status: answer only while awaiting, move
    // on once consumed (record gone or re-created as awaiting).
    let key = "request:user-1:onboarding";
    for reply in ["Ada", "abc", "200", "30"] {
        loop {
            let record = state.get_request_data(key).await.unwrap();
            if matches!(&record, Some(r) if r.status == chatflow::RequestStatus::Awaiting) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        listener.on_message(&message(reply)).await;
        loop {
            let record = state.get_request_data(key).await.unwrap();
            if !matches!(&record, Some(r) if r.status == chatflow::RequestStatus::Resolved) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    flow.await.unwrap();

    let data = state.get_chat_data("onboarding").await.unwrap().unwrap();
    assert_eq!(data["name"], json!("Ada"));
    assert_eq!(data["age"], json!(30.0));

    let sent = chat.sent_messages();
    assert_eq!(sent.first().unwrap(), "What's your name?");
    assert_eq!(sent.last().unwrap(), "All done!");
    // "abc" fails number coercion, "200" fails the range check; both get a
    // rejection followed by a fresh prompt.
    assert_eq!(
        sent.iter().filter(|m| *m == "How old are you?").count(),
        3
    );

    // Nothing outstanding once the flow completed.
    assert!(
        state
            .get_open_request_key("user-1", "onboarding")
            .await
            .unwrap()
            .is_none()
    );
}
