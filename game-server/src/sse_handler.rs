//! The SSE Event Handler: stateless translation from [`DomainEvent`] to
//! wire-level [`Notification`]s, delivered through the connection
//! registry (spec.md §4.6). Registered as the event bus's subscriber.

use std::sync::Arc;

use async_trait::async_trait;
use protocol::{DomainEvent, Notification, NotificationKind};

use crate::bus::EventHandler;
use crate::streams::ConnectionRegistry;

pub struct SseEventHandler {
    connections: Arc<ConnectionRegistry>,
}

impl SseEventHandler {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        SseEventHandler { connections }
    }

    fn send_to_user(&self, user_id: protocol::UserId, notification: Notification) {
        let Ok(payload) = serde_json::to_string(&notification) else {
            tracing::error!(method = %notification.method, "failed to serialize notification");
            return;
        };
        self.connections.broadcast_to_users(vec![user_id], payload);
    }

    fn send_to_all(&self, notification: Notification) {
        let Ok(payload) = serde_json::to_string(&notification) else {
            tracing::error!(method = %notification.method, "failed to serialize notification");
            return;
        };
        self.connections.broadcast_to_all(payload);
    }
}

#[async_trait]
impl EventHandler for SseEventHandler {
    async fn handle(&self, event: DomainEvent) {
        match event {
            DomainEvent::Moved {
                user_id,
                position,
                movement,
                timestamp,
                request_id,
                changes,
                ..
            } => {
                self.send_to_user(
                    user_id.clone(),
                    Notification::new(
                        "trainer.position.updated",
                        serde_json::json!({
                            "user_id": user_id,
                            "changes": changes,
                            "timestamp": timestamp,
                            "request_id": request_id,
                        }),
                    ),
                );
                self.send_to_all(Notification::new(
                    "trainer.position.broadcast",
                    serde_json::json!({
                        "user_id": user_id,
                        "position": position,
                        "movement": movement,
                        "timestamp": timestamp,
                    }),
                ));
            }
            DomainEvent::Stopped {
                user_id,
                position,
                movement,
                timestamp,
                request_id,
                changes,
                ..
            } => {
                self.send_to_user(
                    user_id.clone(),
                    Notification::new(
                        "trainer.movement.stopped",
                        serde_json::json!({
                            "user_id": user_id,
                            "changes": changes,
                            "timestamp": timestamp,
                            "request_id": request_id,
                        }),
                    ),
                );
                self.send_to_all(Notification::new(
                    "trainer.movement.broadcast",
                    serde_json::json!({
                        "user_id": user_id,
                        "position": position,
                        "movement": movement,
                        "timestamp": timestamp,
                    }),
                ));
            }
            DomainEvent::Created {
                player, timestamp, ..
            } => {
                self.send_to_all(Notification::new(
                    "trainer.created",
                    serde_json::json!({ "player": player, "timestamp": timestamp }),
                ));
            }
            DomainEvent::Notification {
                kind,
                target_users,
                method,
                params,
                ..
            } => match kind {
                NotificationKind::Broadcast => {
                    self.send_to_all(Notification::new(method, params));
                }
                NotificationKind::Users => match target_users {
                    Some(users) if !users.is_empty() => {
                        let Ok(payload) =
                            serde_json::to_string(&Notification::new(method, params))
                        else {
                            tracing::error!("failed to serialize targeted notification");
                            return;
                        };
                        self.connections.broadcast_to_users(users, payload);
                    }
                    _ => {
                        tracing::warn!("users notification with no target_users, dropping");
                    }
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use protocol::{MovementState, Position, UserId};

    use super::*;

    #[tokio::test]
    async fn moved_event_notifies_originator_and_broadcasts_to_all() {
        let connections = ConnectionRegistry::new(CancellationToken::new());
        let mut originator_rx = connections
            .add_client("client-alice".into(), UserId::from("alice"))
            .await;
        let mut bystander_rx = connections
            .add_client("client-bob".into(), UserId::from("bob"))
            .await;

        let handler = SseEventHandler::new(connections);
        let now = chrono::Utc::now();
        handler
            .handle(DomainEvent::Moved {
                user_id: UserId::from("alice"),
                nickname: "Alice".into(),
                color: "#e6194b".into(),
                position: Position::new(1.0, 1.0),
                movement: MovementState::idle_at(Position::new(1.0, 1.0), now),
                timestamp: now,
                request_id: "alice-1".into(),
                changes: Some(serde_json::json!({"position": {"x": 1.0}})),
            })
            .await;

        // Alice gets both the originator-only "updated" notification and
        // the "broadcast" copy (she's also a local connection).
        assert!(originator_rx.recv().await.is_some());
        assert!(originator_rx.recv().await.is_some());

        // Bob only gets the broadcast copy.
        assert!(tokio::time::timeout(std::time::Duration::from_millis(100), bystander_rx.recv())
            .await
            .expect("bob should receive the broadcast copy")
            .is_some());
    }

    #[tokio::test]
    async fn users_notification_with_empty_targets_is_dropped_silently() {
        let connections = ConnectionRegistry::new(CancellationToken::new());
        let mut rx = connections
            .add_client("client-alice".into(), UserId::from("alice"))
            .await;

        let handler = SseEventHandler::new(connections);
        handler
            .handle(DomainEvent::Notification {
                kind: NotificationKind::Users,
                target_users: Some(vec![]),
                method: "trainer.custom".into(),
                params: serde_json::json!({}),
                timestamp: chrono::Utc::now(),
                request_id: "r1".into(),
            })
            .await;

        tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv())
            .await
            .expect_err("no notification should have been delivered");
    }

    #[tokio::test]
    async fn created_event_broadcasts_to_all_local_connections() {
        let connections = ConnectionRegistry::new(CancellationToken::new());
        let mut rx = connections
            .add_client("client-a".into(), UserId::from("alice"))
            .await;

        let handler = SseEventHandler::new(connections);
        let now = chrono::Utc::now();
        let player = protocol::Player::new(
            UserId::from("bob"),
            "PlayerBob".into(),
            "#e6194b".into(),
            now,
        );
        handler
            .handle(DomainEvent::Created {
                user_id: UserId::from("bob"),
                player,
                timestamp: now,
                request_id: "bob-1".into(),
            })
            .await;

        assert!(rx.recv().await.is_some());
    }
}
