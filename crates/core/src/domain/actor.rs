use serde::{Deserialize, Serialize};

/// The authenticated user on whose behalf an operation runs. Role checks
/// happen at the interface layer; the engine only stamps identity into the
/// activity log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub username: String,
    pub role: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self { id: id.into(), username: username.into(), role: role.into() }
    }

    /// Identity used by maintenance jobs and the operator CLI.
    pub fn system() -> Self {
        Self::new("system", "system", "system")
    }
}
