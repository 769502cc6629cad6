//! Two-path credential verification.
//!
//! A credential shaped like the local scheme (three dot-separated segments)
//! is tried against the local HS256 key first; on structural mismatch or
//! local failure it falls through to the federated issuer. Only when both
//! paths have failed is the connection rejected. A locally issued token is
//! never handed to the federated issuer speculatively.

use std::time::Duration;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::auth::token::LocalClaims;
use crate::auth::{AuthMethod, Identity};
use crate::error::AuthError;

/// How long to wait on the federated issuer before giving up on that path.
const FEDERATED_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of the federated token-info response we map into an identity.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

pub struct TokenVerifier {
    secret: Vec<u8>,
    http: reqwest::Client,
    tokeninfo_url: String,
    audience: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: Vec<u8>, tokeninfo_url: String, audience: Option<String>) -> Self {
        Self {
            secret,
            http: reqwest::Client::new(),
            tokeninfo_url,
            audience,
        }
    }

    /// Verify a bearer credential against both issuers and yield the
    /// canonical identity for the connection.
    pub async fn verify(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(AuthError::MissingToken),
        };

        let mut local_error = None;
        if looks_local(token) {
            match self.verify_local(token) {
                Ok(identity) => return Ok(identity),
                Err(e) => local_error = Some(e),
            }
        }

        match self.verify_federated(token).await {
            Ok(identity) => Ok(identity),
            Err(federated_reason) => Err(AuthError::Rejected {
                federated_reason,
                local_error,
            }),
        }
    }

    fn verify_local(&self, token: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<LocalClaims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )?;
        Ok(Identity {
            id: data.claims.sub,
            email: data.claims.email,
            display_name: data.claims.name,
            auth_method: AuthMethod::Local,
        })
    }

    async fn verify_federated(&self, token: &str) -> Result<Identity, String> {
        let audience = self
            .audience
            .as_deref()
            .ok_or_else(|| "federated verification not configured".to_string())?;

        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", token)])
            .timeout(FEDERATED_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("token-info request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("issuer rejected token ({})", response.status()));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| format!("malformed token-info response: {e}"))?;

        if info.aud != audience {
            return Err(format!(
                "token audience '{}' does not match expected '{}'",
                info.aud, audience
            ));
        }

        Ok(Identity {
            id: info.sub,
            email: info.email,
            display_name: info.name,
            auth_method: AuthMethod::Federated,
        })
    }
}

/// The local scheme is a compact JWS: exactly three dot-separated segments.
fn looks_local(token: &str) -> bool {
    token.split('.').count() == 3
}
