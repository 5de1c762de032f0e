use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Parsed lazily so a malformed auth block still gets a reply carrying the request id.
    #[serde(default)]
    pub auth: Option<serde_json::Value>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Direction,
    Enseignant,
    Secretariat,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Direction => "direction",
            Role::Enseignant => "enseignant",
            Role::Secretariat => "secretariat",
        }
    }
}

/// Who is calling. Authentication happens upstream; handlers only check the role.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: String,
    pub role: Role,
}

impl AuthContext {
    pub fn allows(&self, roles: &[Role]) -> bool {
        roles.is_empty() || roles.contains(&self.role)
    }
}
