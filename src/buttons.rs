//! # Button router
//!
//! Process-local registry correlating short-lived random button ids back to
//! the caller-supplied option ids. Random ids avoid collisions when several
//! flows render buttons concurrently in one channel. Not persisted: a
//! pending button group cannot survive a restart, only the free-text wait
//! marker can.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::flow::Button;
use crate::service::{ButtonClick, RenderedButton};

/// Discord renders at most five action rows per message.
const MAX_ROWS_PER_MESSAGE: usize = 5;

struct PendingGroup {
    click_tx: oneshot::Sender<String>,
    custom_ids: Vec<String>,
}

struct IndexEntry {
    group_id: Uuid,
    option_id: String,
    label: String,
}

#[derive(Default)]
struct RouterInner {
    groups: HashMap<Uuid, PendingGroup>,
    by_custom_id: HashMap<String, IndexEntry>,
}

/// One registered button group: the awaitable click plus the rendered
/// batches to hand to the transport (each batch is one message of at most
/// five rows).
pub struct ButtonWait {
    pub group_id: Uuid,
    pub batches: Vec<Vec<Vec<RenderedButton>>>,
    click_rx: oneshot::Receiver<String>,
}

impl ButtonWait {
    /// Resolves with the original option id of the clicked button, or
    /// `Err` when the group was cancelled.
    pub async fn clicked(self) -> Result<String, oneshot::error::RecvError> {
        self.click_rx.await
    }
}

#[derive(Default)]
pub struct ButtonRouter {
    inner: Mutex<RouterInner>,
}

impl ButtonRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns fresh correlation ids to every button and registers the
    /// group. The first click on any of them settles the wait.
    pub fn register(&self, rows: &[Vec<Button>]) -> ButtonWait {
        let group_id = Uuid::new_v4();
        let (click_tx, click_rx) = oneshot::channel();

        let mut inner = self.inner.lock().unwrap();
        let mut custom_ids = Vec::new();
        let mut rendered_rows = Vec::with_capacity(rows.len());

        for row in rows {
            let mut rendered_row = Vec::with_capacity(row.len());
            for button in row {
                let custom_id = Uuid::new_v4().to_string();
                inner.by_custom_id.insert(
                    custom_id.clone(),
                    IndexEntry {
                        group_id,
                        option_id: button.id.clone(),
                        label: button.label.clone(),
                    },
                );
                custom_ids.push(custom_id.clone());
                rendered_row.push(RenderedButton {
                    custom_id,
                    label: button.label.clone(),
                });
            }
            rendered_rows.push(rendered_row);
        }

        let batches = rendered_rows
            .chunks(MAX_ROWS_PER_MESSAGE)
            .map(|chunk| chunk.to_vec())
            .collect();

        inner.groups.insert(
            group_id,
            PendingGroup {
                click_tx,
                custom_ids,
            },
        );

        ButtonWait {
            group_id,
            batches,
            click_rx,
        }
    }

    /// Routes a click. When the id belongs to a registered group the wait is
    /// settled with the original option id, the whole group is dropped, and
    /// the clicked label is returned so the caller can acknowledge the
    /// interaction. Unknown ids return `None`.
    pub fn resolve(&self, click: &ButtonClick) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.by_custom_id.get(&click.custom_id)?;
        let group_id = entry.group_id;
        let option_id = entry.option_id.clone();
        let label = entry.label.clone();

        if let Some(group) = inner.groups.remove(&group_id) {
            for custom_id in &group.custom_ids {
                inner.by_custom_id.remove(custom_id);
            }
            let _ = group.click_tx.send(option_id);
        }
        Some(label)
    }

    /// Drops a group without a click, e.g. when the surrounding ask timed
    /// out. Settled groups are already gone; this is a no-op for them.
    pub fn cancel(&self, group_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(group) = inner.groups.remove(&group_id) {
            for custom_id in &group.custom_ids {
                inner.by_custom_id.remove(custom_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(custom_id: &str) -> ButtonClick {
        ButtonClick {
            custom_id: custom_id.to_string(),
            user_id: "u".to_string(),
            channel_id: "c".to_string(),
        }
    }

    fn options(ids: &[&str]) -> Vec<Vec<Button>> {
        vec![
            ids.iter()
                .map(|id| Button::new(*id, format!("label-{id}")))
                .collect(),
        ]
    }

    #[tokio::test]
    async fn click_resolves_with_original_option_id() {
        let router = ButtonRouter::new();
        let wait = router.register(&options(&["yes", "no"]));

        let rendered: Vec<_> = wait.batches.iter().flatten().flatten().collect();
        assert_eq!(rendered.len(), 2);
        // Correlation ids are never the caller-supplied ids.
        assert!(rendered.iter().all(|b| b.custom_id != "yes" && b.custom_id != "no"));

        let yes_custom = rendered
            .iter()
            .find(|b| b.label == "label-yes")
            .unwrap()
            .custom_id
            .clone();

        let label = router.resolve(&click(&yes_custom));
        assert_eq!(label, Some("label-yes".to_string()));
        assert_eq!(wait.clicked().await.unwrap(), "yes");

        // The whole group is consumed: a second click routes nowhere.
        assert_eq!(router.resolve(&click(&yes_custom)), None);
    }

    #[tokio::test]
    async fn rows_are_batched_five_per_message() {
        let router = ButtonRouter::new();
        let rows: Vec<Vec<Button>> = (0..7)
            .map(|i| vec![Button::new(format!("opt-{i}"), format!("Option {i}"))])
            .collect();
        let wait = router.register(&rows);

        assert_eq!(wait.batches.len(), 2);
        assert_eq!(wait.batches[0].len(), 5);
        assert_eq!(wait.batches[1].len(), 2);
        router.cancel(wait.group_id);
    }

    #[tokio::test]
    async fn cancel_drops_the_group() {
        let router = ButtonRouter::new();
        let wait = router.register(&options(&["a"]));
        let custom_id = wait.batches[0][0][0].custom_id.clone();

        router.cancel(wait.group_id);
        assert_eq!(router.resolve(&click(&custom_id)), None);
        assert!(wait.clicked().await.is_err());
    }

    #[tokio::test]
    async fn unknown_custom_id_is_ignored() {
        let router = ButtonRouter::new();
        assert_eq!(router.resolve(&click("not-registered")), None);
    }
}
