//! Identity tokens for relay authentication.
//!
//! The external identity service signs `participant_id || valid_until`
//! with its Ed25519 key and hands the token to the client, which presents
//! it as a bearer credential when connecting to the relay. The relay is
//! configured with the identity service's public key and verifies the
//! signature; it never issues tokens itself.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ParticipantId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Invalid token signature")]
    BadSignature,
}

/// A bearer token binding a participant identity to an expiry, signed by
/// the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    pub participant_id: ParticipantId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

fn signing_payload(participant_id: &ParticipantId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(participant_id.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

/// Issue a token. Lives here so the identity service and test fixtures
/// share one definition of the signing payload.
pub fn create_identity_token(
    participant_id: ParticipantId,
    valid_until: DateTime<Utc>,
    signing_key: &SigningKey,
) -> IdentityToken {
    let payload = signing_payload(&participant_id, &valid_until);
    let signature = signing_key.sign(&payload);

    IdentityToken {
        participant_id,
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Verify a token against the identity service's public key and return
/// the authenticated participant.
pub fn verify_identity_token(
    token: &IdentityToken,
    service_pubkey: &[u8; 32],
) -> Result<ParticipantId, TokenError> {
    if Utc::now() > token.valid_until {
        return Err(TokenError::Expired(token.valid_until));
    }

    let verifying_key =
        VerifyingKey::from_bytes(service_pubkey).map_err(|_| TokenError::BadSignature)?;
    let signature = Signature::from_slice(&token.signature).map_err(|_| TokenError::Malformed)?;

    let payload = signing_payload(&token.participant_id, &token.valid_until);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(token.participant_id.clone())
}

impl IdentityToken {
    /// Encode for transport in an `Authorization: Bearer` header.
    pub fn to_bearer(&self) -> String {
        let json = serde_json::to_vec(self).expect("token serializes");
        BASE64.encode(json)
    }

    /// Decode the bearer form. Does not verify the signature.
    pub fn from_bearer(bearer: &str) -> Result<Self, TokenError> {
        let bytes = BASE64.decode(bearer.trim()).map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
    }
}
