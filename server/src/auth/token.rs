use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Claims carried by locally issued access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalClaims {
    /// User id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Load or generate the HS256 signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/signing_key.
/// The key MUST be cryptographically random, never human-readable.
pub fn load_or_generate_signing_key(
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("signing_key");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("Signing key file has wrong size ({}), regenerating", key.len());
    }

    // Generate new 256-bit random key
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a local access token. The relay only verifies tokens during the
/// handshake; issuance exists for operators and tests.
pub fn issue_local_token(
    secret: &[u8],
    user_id: &str,
    email: Option<&str>,
    name: Option<&str>,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = LocalClaims {
        sub: user_id.to_string(),
        email: email.map(str::to_string),
        name: name.map(str::to_string),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}
