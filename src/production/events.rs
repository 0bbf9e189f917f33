//! Production events and the broadcaster seam.
//!
//! Event payloads are the wire contract: any transport must carry them as
//! serialized here. Publishing is best-effort and at-most-once; the
//! orchestrator never waits for acknowledgment and treats publish errors as
//! warnings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::types::{ScenePhase, SceneTask};

/// Default per-project channel capacity for [`ChannelBroadcaster`].
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Summary of a planned scene, as carried by `scenes_planned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedScene {
    pub scene_id: String,
    pub index: usize,
    pub title: String,
    pub description: String,
    pub duration_seconds: Option<f64>,
}

impl From<&SceneTask> for PlannedScene {
    fn from(task: &SceneTask) -> Self {
        Self {
            scene_id: task.scene_id.clone(),
            index: task.index,
            title: task.title.clone(),
            description: task.description.clone(),
            duration_seconds: task.target_duration_seconds,
        }
    }
}

/// A state-change notification for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductionEvent {
    ScenesPlanned {
        scenes: Vec<PlannedScene>,
    },
    SceneUpdate {
        scene_id: String,
        status: ScenePhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
    },
    ProjectComplete {
        project_id: String,
    },
}

impl ProductionEvent {
    pub fn scene_update(
        scene_id: impl Into<String>,
        status: ScenePhase,
        progress_message: Option<String>,
    ) -> Self {
        ProductionEvent::SceneUpdate {
            scene_id: scene_id.into(),
            status,
            progress_message,
            media_url: None,
        }
    }

    /// Event name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ProductionEvent::ScenesPlanned { .. } => "scenes_planned",
            ProductionEvent::SceneUpdate { .. } => "scene_update",
            ProductionEvent::ProjectComplete { .. } => "project_complete",
        }
    }

    pub fn is_project_complete(&self) -> bool {
        matches!(self, ProductionEvent::ProjectComplete { .. })
    }
}

/// Errors a broadcaster may report. Callers only log them.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Event transport failed: {0}")]
    Transport(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receives state-change notifications keyed by project.
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn publish(&self, project_id: &str, event: ProductionEvent)
        -> Result<(), BroadcastError>;
}

/// Broadcaster that only writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroadcaster;

#[async_trait]
impl EventBroadcaster for LogBroadcaster {
    async fn publish(
        &self,
        project_id: &str,
        event: ProductionEvent,
    ) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(&event)?;
        info!(project_id = %project_id, event = event.kind(), %payload, "Production event");
        Ok(())
    }
}

/// In-process fan-out of events to any number of subscribers per project.
///
/// Events published before anyone subscribes to a project are dropped.
/// The project's channel is removed once `project_complete` is published.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    capacity: usize,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ProductionEvent>>>>,
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns a raw receiver for the project's events.
    pub fn receiver(&self, project_id: &str) -> broadcast::Receiver<ProductionEvent> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(project_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Streams the project's events, ending after `project_complete`.
    ///
    /// A subscriber that falls behind skips the overwritten events and keeps
    /// going.
    pub fn subscribe(&self, project_id: &str) -> impl Stream<Item = ProductionEvent> + Send {
        let mut rx = self.receiver(project_id);
        let project_id = project_id.to_string();

        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = event.is_project_complete();
                        yield event;
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(project_id = %project_id, skipped, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Number of projects with an open channel.
    pub fn open_channels(&self) -> usize {
        self.channels.read().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventBroadcaster for ChannelBroadcaster {
    async fn publish(
        &self,
        project_id: &str,
        event: ProductionEvent,
    ) -> Result<(), BroadcastError> {
        let complete = event.is_project_complete();
        let kind = event.kind();

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(project_id) {
            // No live receivers is not an error: delivery is at-most-once.
            let delivered = sender.send(event).unwrap_or(0);
            debug!(project_id = %project_id, event = kind, delivered, "Published event");
        }
        if complete {
            channels.remove(project_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_wire_shapes() {
        let event = ProductionEvent::SceneUpdate {
            scene_id: "s1".to_string(),
            status: ScenePhase::Ready,
            progress_message: None,
            media_url: Some("/media/p/scene_0.mp4".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "scene_update");
        assert_eq!(json["scene_id"], "s1");
        assert_eq!(json["status"], "ready");
        assert_eq!(json["media_url"], "/media/p/scene_0.mp4");
        assert!(json.get("progress_message").is_none());

        let json = serde_json::to_value(ProductionEvent::ProjectComplete {
            project_id: "p".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "project_complete");
        assert_eq!(json["project_id"], "p");

        let json = serde_json::to_value(ProductionEvent::ScenesPlanned { scenes: vec![] }).unwrap();
        assert_eq!(json["type"], "scenes_planned");
        assert!(json["scenes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_ends_after_project_complete() {
        let broadcaster = ChannelBroadcaster::default();
        let stream = broadcaster.subscribe("p1");

        broadcaster
            .publish(
                "p1",
                ProductionEvent::scene_update("s1", ScenePhase::Rendering, None),
            )
            .await
            .unwrap();
        broadcaster
            .publish("p2", ProductionEvent::ProjectComplete { project_id: "p2".into() })
            .await
            .unwrap();
        broadcaster
            .publish("p1", ProductionEvent::ProjectComplete { project_id: "p1".into() })
            .await
            .unwrap();

        let events: Vec<ProductionEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "scene_update");
        assert!(events[1].is_project_complete());
        assert_eq!(broadcaster.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broadcaster = ChannelBroadcaster::new(4);
        let result = broadcaster
            .publish("nobody", ProductionEvent::ScenesPlanned { scenes: vec![] })
            .await;
        assert!(result.is_ok());
        assert_eq!(broadcaster.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_receiving() {
        let broadcaster = ChannelBroadcaster::new(2);
        let stream = broadcaster.subscribe("p");
        for i in 0..5 {
            broadcaster
                .publish(
                    "p",
                    ProductionEvent::scene_update(format!("s{}", i), ScenePhase::Queued, None),
                )
                .await
                .unwrap();
        }
        broadcaster
            .publish("p", ProductionEvent::ProjectComplete { project_id: "p".into() })
            .await
            .unwrap();

        let events: Vec<ProductionEvent> = stream.collect().await;
        assert!(events.last().unwrap().is_project_complete());
        assert!(events.len() <= 3);
    }

    #[tokio::test]
    async fn test_log_broadcaster() {
        let result = LogBroadcaster
            .publish("p", ProductionEvent::ProjectComplete { project_id: "p".into() })
            .await;
        assert!(result.is_ok());
    }
}
