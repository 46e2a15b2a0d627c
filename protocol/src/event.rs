use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::Player;
use crate::position::{MovementState, Position};
use crate::user_id::UserId;

/// Which set of locally-connected clients a [`DomainEvent::Notification`]
/// should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Broadcast,
    Users,
}

/// The tagged union of everything that travels over the event bus. Topic
/// name is derived from the variant (`"game-events." + EventName`) by
/// [`crate::event::DomainEvent::topic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_name")]
pub enum DomainEvent {
    Moved {
        user_id: UserId,
        nickname: String,
        color: String,
        position: Position,
        movement: MovementState,
        timestamp: DateTime<Utc>,
        request_id: String,
        /// `None` for broadcaster-originated ticks, `Some(patch)` for
        /// command-originated moves (Open Question (b), resolved in
        /// DESIGN.md).
        #[serde(skip_serializing_if = "Option::is_none")]
        changes: Option<serde_json::Value>,
    },
    Stopped {
        user_id: UserId,
        nickname: String,
        color: String,
        position: Position,
        movement: MovementState,
        timestamp: DateTime<Utc>,
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        changes: Option<serde_json::Value>,
    },
    Created {
        user_id: UserId,
        player: Player,
        timestamp: DateTime<Utc>,
        request_id: String,
    },
    Notification {
        kind: NotificationKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_users: Option<Vec<UserId>>,
        method: String,
        params: serde_json::Value,
        timestamp: DateTime<Utc>,
        request_id: String,
    },
}

/// Every topic name an event bus subscriber needs a consumer group on.
pub const ALL_TOPICS: [&str; 4] = [
    "game-events.TrainerMovedEvent",
    "game-events.TrainerStoppedEvent",
    "game-events.TrainerCreatedEvent",
    "game-events.SSENotificationEvent",
];

impl DomainEvent {
    /// Stable topic name for this event kind, per spec.md §6:
    /// `"game-events." + EventName`.
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEvent::Moved { .. } => "game-events.TrainerMovedEvent",
            DomainEvent::Stopped { .. } => "game-events.TrainerStoppedEvent",
            DomainEvent::Created { .. } => "game-events.TrainerCreatedEvent",
            DomainEvent::Notification { .. } => "game-events.SSENotificationEvent",
        }
    }

    /// `requestID` formatted as `userID + "-" + unixNano`, the instance-
    /// prefix scheme spec.md §4.5 requires so downstream dedup is
    /// possible. For broadcaster-originated ticks the caller passes a
    /// `"broadcast-"` prefixed id instead (see `broadcaster.rs`).
    pub fn command_request_id(user_id: &UserId, now: DateTime<Utc>) -> String {
        format!("{}-{}", user_id, now.timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn broadcast_request_id(user_id: &UserId, now: DateTime<Utc>) -> String {
        format!("broadcast-{}-{}", user_id, now.format("%H%M%S%.3f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_match_spec() {
        let now = Utc::now();
        let moved = DomainEvent::Moved {
            user_id: UserId::from("alice"),
            nickname: "Alice".into(),
            color: "#e6194b".into(),
            position: Position::new(0.0, 0.0),
            movement: crate::position::MovementState::idle_at(Position::new(0.0, 0.0), now),
            timestamp: now,
            request_id: "r1".into(),
            changes: None,
        };
        assert_eq!(moved.topic(), "game-events.TrainerMovedEvent");
    }

    #[test]
    fn broadcast_request_id_carries_the_broadcast_prefix() {
        let id = DomainEvent::broadcast_request_id(&UserId::from("alice"), Utc::now());
        assert!(id.starts_with("broadcast-alice-"));
    }
}
