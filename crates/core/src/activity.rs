use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::Actor;

/// One append-only back-office activity entry, stamped with the acting user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub actor_id: String,
    pub actor_username: String,
    pub action: String,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(actor: &Actor, action: impl Into<String>) -> Self {
        Self {
            id: format!("act-{}", Uuid::new_v4()),
            actor_id: actor.id.clone(),
            actor_username: actor.username.clone(),
            action: action.into(),
            occurred_at: Utc::now(),
        }
    }
}
