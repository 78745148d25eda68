//! Credential resolution for inbound requests.
//!
//! Two schemes: an explicit `Authorization: Bearer <jwt>` header (HS256) and
//! an ambient session cookie looked up in the session store. Whatever the
//! scheme, the returned identity is always the identity store's current view
//! of the user, never the token's claims.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::models::Identity;
use crate::store::{IdentityStore, SessionStore};

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScheme {
    Bearer,
    Cookie,
}

/// Identity plus the scheme that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Authenticated {
    pub identity: Identity,
    pub scheme: CredentialScheme,
}

#[derive(Clone)]
pub struct SessionVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    cookie_name: String,
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl SessionVerifier {
    pub fn new(
        jwt_secret: &SecretString,
        cookie_name: impl Into<String>,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let secret = jwt_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            cookie_name: cookie_name.into(),
            identities,
            sessions,
            clock,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign a bearer token for `identity` valid for `ttl`.
    pub fn issue_token(&self, identity: &Identity, ttl: Duration) -> Result<String, anyhow::Error> {
        let claims = SessionClaims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role.map(|r| r.as_str().to_string()),
            exp: (self.clock.now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))
    }

    fn decode_claims(&self, token: &str) -> Option<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against the injected clock below
        validation.validate_exp = false;

        let claims = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| tracing::debug!(error = %e, "Rejected bearer token"))
            .ok()?
            .claims;
        if claims.exp <= self.clock.now().timestamp() {
            tracing::debug!(sub = %claims.sub, "Bearer token expired");
            return None;
        }
        Some(claims)
    }

    async fn load_identity(&self, user_id: &str) -> Option<Identity> {
        match self.identities.find_identity(user_id).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!(error = %e, user_id, "Identity lookup failed during authentication");
                None
            }
        }
    }

    pub async fn verify_bearer(&self, token: &str) -> Option<Identity> {
        let claims = self.decode_claims(token)?;
        self.load_identity(&claims.sub).await
    }

    pub async fn verify_session(&self, session_id: &str) -> Option<Identity> {
        let session = match self.sessions.find_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed");
                return None;
            }
        };
        if !session.is_active(self.clock.now()) {
            tracing::debug!(user_id = %session.user_id, "Session expired or revoked");
            return None;
        }
        self.load_identity(&session.user_id).await
    }

    /// Bearer first, then the session cookie. Absent credentials are not an
    /// error; they simply resolve to `None`.
    pub async fn authenticate(
        &self,
        bearer: Option<&str>,
        session_id: Option<&str>,
    ) -> Option<Authenticated> {
        if let Some(token) = bearer {
            if let Some(identity) = self.verify_bearer(token).await {
                return Some(Authenticated {
                    identity,
                    scheme: CredentialScheme::Bearer,
                });
            }
        }
        if let Some(session_id) = session_id {
            if let Some(identity) = self.verify_session(session_id).await {
                return Some(Authenticated {
                    identity,
                    scheme: CredentialScheme::Cookie,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Role, SessionRecord};
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;

    fn verifier() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionVerifier) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let verifier = SessionVerifier::new(
            &SecretString::new("test-secret".into()),
            "session_id",
            store.clone(),
            store.clone(),
            clock.clone(),
        );
        (store, clock, verifier)
    }

    #[tokio::test]
    async fn bearer_resolves_to_stored_identity() {
        let (store, _, v) = verifier();
        store.insert_identity(Identity::new("u1").with_role(Role::Builder));

        // token claims an elevated role; the store wins
        let forged = Identity::new("u1").with_role(Role::Admin);
        let token = v.issue_token(&forged, Duration::hours(1)).unwrap();

        let auth = v.authenticate(Some(&token), None).await.unwrap();
        assert_eq!(auth.scheme, CredentialScheme::Bearer);
        assert_eq!(auth.identity.role, Some(Role::Builder));
    }

    #[tokio::test]
    async fn expired_or_foreign_tokens_are_rejected() {
        let (store, clock, v) = verifier();
        store.insert_identity(Identity::new("u1"));
        let token = v.issue_token(&Identity::new("u1"), Duration::minutes(5)).unwrap();

        clock.advance(Duration::minutes(6));
        assert!(v.verify_bearer(&token).await.is_none());
        assert!(v.verify_bearer("not-a-jwt").await.is_none());
    }

    #[tokio::test]
    async fn token_for_unknown_user_yields_nothing() {
        let (_, _, v) = verifier();
        let token = v.issue_token(&Identity::new("ghost"), Duration::hours(1)).unwrap();
        assert!(v.authenticate(Some(&token), None).await.is_none());
    }

    #[tokio::test]
    async fn falls_back_to_cookie_session() {
        let (store, clock, v) = verifier();
        store.insert_identity(Identity::new("u2").with_role(Role::Buyer));
        store.insert_session(SessionRecord {
            session_id: "s-1".into(),
            user_id: "u2".into(),
            expires_at: clock.now() + Duration::hours(1),
            revoked: false,
        });

        let auth = v.authenticate(Some("garbage"), Some("s-1")).await.unwrap();
        assert_eq!(auth.scheme, CredentialScheme::Cookie);
        assert_eq!(auth.identity.id, "u2");

        clock.advance(Duration::hours(2));
        assert!(v.authenticate(None, Some("s-1")).await.is_none());
    }

    #[tokio::test]
    async fn revoked_session_is_rejected() {
        let (store, clock, v) = verifier();
        store.insert_identity(Identity::new("u3"));
        store.insert_session(SessionRecord {
            session_id: "s-2".into(),
            user_id: "u3".into(),
            expires_at: clock.now() + Duration::hours(1),
            revoked: true,
        });
        assert!(v.verify_session("s-2").await.is_none());
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
