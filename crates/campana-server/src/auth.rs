//! Bearer-token authentication for relay connections.
//!
//! The identity is attached to the websocket connection at upgrade time;
//! `join-call` on an unauthenticated connection is impossible because the
//! upgrade itself is refused.

use axum::http::{header, HeaderMap};
use tracing::debug;

use campana_shared::identity::{verify_identity_token, IdentityToken};
use campana_shared::types::ParticipantId;

use crate::error::ServerError;

/// Extract and verify the bearer token from the upgrade request headers.
pub fn authenticate(
    headers: &HeaderMap,
    service_pubkey: &[u8; 32],
) -> Result<ParticipantId, ServerError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServerError::Unauthenticated("missing bearer token".to_string()))?;

    let token = IdentityToken::from_bearer(bearer)
        .map_err(|e| ServerError::Unauthenticated(e.to_string()))?;

    let participant = verify_identity_token(&token, service_pubkey)
        .map_err(|e| ServerError::Unauthenticated(e.to_string()))?;

    debug!(peer = %participant.short(), "Authenticated relay connection");
    Ok(participant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campana_shared::identity::create_identity_token;
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn headers_with_bearer(bearer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {bearer}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_valid_bearer_authenticates() {
        let key = SigningKey::generate(&mut OsRng);
        let token = create_identity_token(
            ParticipantId::new("agent-9"),
            Utc::now() + Duration::hours(1),
            &key,
        );

        let id = authenticate(
            &headers_with_bearer(&token.to_bearer()),
            &key.verifying_key().to_bytes(),
        )
        .unwrap();
        assert_eq!(id, ParticipantId::new("agent-9"));
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let err = authenticate(&HeaderMap::new(), &[0u8; 32]).unwrap_err();
        assert!(matches!(err, ServerError::Unauthenticated(_)));
    }

    #[test]
    fn test_token_signed_by_other_key_is_unauthenticated() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let token = create_identity_token(
            ParticipantId::new("agent-9"),
            Utc::now() + Duration::hours(1),
            &key,
        );

        let err = authenticate(
            &headers_with_bearer(&token.to_bearer()),
            &other.verifying_key().to_bytes(),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::Unauthenticated(_)));
    }
}
