//! Session tokens minted by this service.
//!
//! Tokens are HS256 JWTs signed with the configured secret. They are
//! self-contained: nothing is stored server-side, so verification is a pure
//! function of the token, the secret and the clock.

use crate::auth::graph::UserProfile;
use crate::error::SessionTokenError;
use crate::secure::SecureString;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    fn from_profile(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.provider_user_id.clone(),
            email: profile.email.clone(),
            name: profile.display_name.clone(),
            groups: profile.groups.clone(),
            roles: profile.roles.clone(),
            iat: 0,
            exp: 0,
        }
    }
}

/// Issues and verifies session tokens with a shared symmetric secret.
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionTokens {
    pub fn new(secret: &SecureString) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_str().as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_str().as_bytes()),
        }
    }

    /// Mint a token for `profile` expiring `ttl` from now. A negative `ttl` is allowed.
    pub fn issue(&self, profile: &UserProfile, ttl: Duration) -> Result<String, SessionTokenError> {
        self.reissue(SessionClaims::from_profile(profile), ttl)
    }

    /// Re-sign `claims` with fresh `iat`/`exp`, keeping the identity fields.
    pub fn reissue(
        &self,
        mut claims: SessionClaims,
        ttl: Duration,
    ) -> Result<String, SessionTokenError> {
        let now = Utc::now();
        claims.iat = now.timestamp();
        claims.exp = (now + ttl).timestamp();

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionTokenError::Signing(e.to_string()))
    }

    /// Check signature, structure and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        self.decode(token, true)
    }

    /// Check signature and structure but accept expired tokens.
    ///
    /// This is a deliberate relaxation for the session refresh path only: an
    /// authentic token may be renewed after it lapses. A token whose signature
    /// does not verify is still rejected.
    pub fn verify_ignoring_expiry(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        self.decode(token, false)
    }

    fn decode(&self, token: &str, check_expiry: bool) -> Result<SessionClaims, SessionTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_required_spec_claims(&["exp"]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => SessionTokenError::Signature,
                ErrorKind::ExpiredSignature => SessionTokenError::Expired,
                _ => SessionTokenError::Malformed(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            provider_user_id: "user-1".into(),
            email: "ada@contoso.com".into(),
            display_name: "Ada Lovelace".into(),
            groups: ["Engineering".to_string()].into(),
            roles: ["Global Reader".to_string()].into(),
        }
    }

    fn tokens() -> SessionTokens {
        SessionTokens::new(&SecureString::new("unit-test-secret".into()))
    }

    #[test]
    fn test_round_trip() {
        let tokens = tokens();
        let token = tokens.issue(&profile(), Duration::hours(24)).unwrap();
        let claims = tokens.verify(&token).unwrap();

        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email, "ada@contoso.com");
        assert_eq!(claims.name, "Ada Lovelace");
        assert!(claims.groups.contains("Engineering"));
        assert!(claims.roles.contains("Global Reader"));
        assert_eq!(claims.exp - claims.iat, 86400);
    }

    #[test]
    fn test_any_modified_character_is_rejected() {
        let tokens = tokens();
        let token = tokens.issue(&profile(), Duration::hours(1)).unwrap();

        for (i, c) in token.char_indices() {
            if c == '.' {
                continue;
            }
            let replacement = if c == 'A' { 'B' } else { 'A' };
            let mut tampered = token.clone();
            tampered.replace_range(i..i + 1, &replacement.to_string());
            assert!(
                tokens.verify(&tampered).is_err(),
                "tampering at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_is_signature_error() {
        let token = tokens().issue(&profile(), Duration::hours(1)).unwrap();
        let other = SessionTokens::new(&SecureString::new("other-secret".into()));

        assert!(matches!(other.verify(&token), Err(SessionTokenError::Signature)));
        assert!(matches!(
            other.verify_ignoring_expiry(&token),
            Err(SessionTokenError::Signature)
        ));
    }

    #[test]
    fn test_expired_token() {
        let tokens = tokens();
        let token = tokens.issue(&profile(), Duration::seconds(-1)).unwrap();

        assert!(matches!(tokens.verify(&token), Err(SessionTokenError::Expired)));
        let claims = tokens.verify_ignoring_expiry(&token).unwrap();
        assert_eq!(claims.user_id, "user-1");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            tokens().verify("not-a-token"),
            Err(SessionTokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_tokens_without_membership_claims_verify() {
        #[derive(Serialize)]
        struct LegacyClaims<'a> {
            user_id: &'a str,
            email: &'a str,
            name: &'a str,
            exp: i64,
        }

        let secret = b"unit-test-secret";
        let legacy = encode(
            &Header::new(Algorithm::HS256),
            &LegacyClaims {
                user_id: "u",
                email: "u@example.com",
                name: "U",
                exp: (Utc::now() + Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        let claims = tokens().verify(&legacy).unwrap();
        assert!(claims.groups.is_empty());
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn test_reissue_keeps_identity() {
        let tokens = tokens();
        let expired = tokens.issue(&profile(), Duration::hours(-1)).unwrap();
        let claims = tokens.verify_ignoring_expiry(&expired).unwrap();

        let renewed = tokens.reissue(claims.clone(), Duration::hours(24)).unwrap();
        let fresh = tokens.verify(&renewed).unwrap();
        assert_eq!(fresh.user_id, claims.user_id);
        assert_eq!(fresh.groups, claims.groups);
        assert!(fresh.exp > claims.exp);
    }
}
