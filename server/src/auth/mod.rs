pub mod token;
pub mod verifier;

use serde::{Deserialize, Serialize};

/// Which verification path accepted a connection's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Local,
    Federated,
}

/// Canonical identity record for one connection.
/// Produced once by the token verifier during the handshake and immutable
/// for the connection's lifetime. `email` may be absent for local auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub auth_method: AuthMethod,
}

impl Identity {
    /// Name shown to other participants; falls back to the user id.
    pub fn display_name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}
