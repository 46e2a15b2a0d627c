use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::position::{MovementState, Position};
use crate::user_id::UserId;

/// The player aggregate, keyed by [`UserId`]. `level`, `experience`,
/// `stats`, `money`, `inventory` and `party` are treated opaquely by the
/// core and live in `extra` as a single JSON blob — the core never
/// interprets their shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: UserId,
    pub nickname: String,
    pub color: String,
    pub position: Position,
    pub movement: MovementState,
    #[serde(default = "default_extra")]
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_extra() -> serde_json::Value {
    serde_json::json!({})
}

/// Default spawn position for a newly auto-created player (spec.md §8,
/// scenario S1: "Start position is 15,10 default.").
pub const DEFAULT_SPAWN_POSITION: Position = Position::new(15.0, 10.0);

impl Player {
    /// Factory used on auto-create (spec.md §4.8 step 3): idle at the
    /// default spawn position, freshly-assigned palette color, empty
    /// `extra` blob.
    pub fn new(id: UserId, nickname: String, color: String, now: DateTime<Utc>) -> Self {
        let position = DEFAULT_SPAWN_POSITION;
        Player {
            id,
            nickname,
            color,
            position,
            movement: MovementState::idle_at(position, now),
            extra: default_extra(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates a nickname per spec.md §3: 3 to 20 characters.
    pub fn validate_nickname(nickname: &str) -> Result<(), ServerError> {
        let len = nickname.chars().count();
        if !(3..=20).contains(&len) {
            return Err(ServerError::InvalidInput(format!(
                "nickname must be 3-20 characters, got {len}"
            )));
        }
        Ok(())
    }

    /// The default auto-created nickname: `"Player" + first 8 chars of the UserId`.
    pub fn default_nickname(id: &UserId) -> String {
        format!("Player{}", id.prefix(8))
    }
}

/// The registry's compact value payload: enough for the broadcaster to
/// construct an event without reading the full [`Player`], encoded as
/// `"userID:color"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovingEntry {
    pub user_id: UserId,
    pub color: String,
}

impl MovingEntry {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.user_id, self.color)
    }

    pub fn decode(raw: &str) -> Result<Self, ServerError> {
        let (user_id, color) = raw
            .split_once(':')
            .ok_or_else(|| ServerError::Internal(format!("malformed moving entry: {raw:?}")))?;
        Ok(MovingEntry {
            user_id: UserId::from(user_id),
            color: color.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_entry_round_trips() {
        let entry = MovingEntry {
            user_id: UserId::from("alice"),
            color: "#e6194b".to_owned(),
        };
        let encoded = entry.encode();
        assert_eq!(encoded, "alice:#e6194b");
        assert_eq!(MovingEntry::decode(&encoded).unwrap(), entry);
    }

    #[test]
    fn moving_entry_rejects_malformed_payload() {
        assert!(MovingEntry::decode("no-separator-here").is_err());
    }

    #[test]
    fn nickname_validation_enforces_length_bounds() {
        assert!(Player::validate_nickname("ab").is_err());
        assert!(Player::validate_nickname("abc").is_ok());
        assert!(Player::validate_nickname(&"a".repeat(20)).is_ok());
        assert!(Player::validate_nickname(&"a".repeat(21)).is_err());
    }
}
