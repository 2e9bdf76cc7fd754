//! Login flow orchestration.
//!
//! One login attempt moves from `start_login` (state issued, user sent to the
//! provider) to `handle_callback` (state redeemed, code exchanged, session
//! token minted). Session tokens are renewed by `refresh_session` and read
//! back by `current_user`.

use crate::auth::provider::IdentityProvider;
use crate::auth::session::{SessionClaims, SessionTokens};
use crate::auth::state_store::StateStore;
use crate::config::{Config, EnrichmentConfig};
use crate::error::AuthError;
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Response of the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub auth_url: String,
}

/// Query parameters of the provider redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Split into `(code, state)`, rejecting provider errors and callbacks without a state.
    ///
    /// The code is checked only after the state has been redeemed.
    fn into_grant(self) -> Result<(Option<String>, String), AuthError> {
        if let Some(error) = self.error {
            warn!(
                "Provider returned error {}: {}",
                error,
                self.error_description.as_deref().unwrap_or("no description")
            );
            return Err(AuthError::ProviderError(error));
        }

        match self.state {
            Some(state) if !state.is_empty() => {
                Ok((self.code.filter(|c| !c.is_empty()), state))
            }
            _ => Err(AuthError::InvalidRequest),
        }
    }
}

/// Identity claims returned to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub groups: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

impl From<SessionClaims> for UserInfo {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            name: claims.name,
            groups: claims.groups,
            roles: claims.roles,
        }
    }
}

/// A renewed session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedSession {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Sequences the provider, state store and session tokens for each flow.
pub struct AuthFlow {
    provider: Arc<dyn IdentityProvider>,
    states: Arc<dyn StateStore>,
    sessions: SessionTokens,
    enrichment: EnrichmentConfig,
    session_ttl: Duration,
    success_url: Url,
}

impl AuthFlow {
    pub fn new(
        config: &Config,
        provider: Arc<dyn IdentityProvider>,
        states: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let success_url = Url::parse(&format!(
            "{}/auth/success",
            config.server.frontend_url.trim_end_matches('/')
        ))
        .context("Invalid frontend URL")?;

        Ok(Self {
            provider,
            states,
            sessions: SessionTokens::new(&config.session.signing_secret),
            enrichment: config.enrichment,
            session_ttl: config.session_ttl(),
            success_url,
        })
    }

    /// Begin a login: register a state and return the provider URL.
    pub async fn start_login(&self) -> LoginResponse {
        let issued = self.states.create().await;
        let url = self
            .provider
            .authorization_url(&issued.state, &issued.code_challenge);

        info!("Login started");
        LoginResponse {
            auth_url: url.into(),
        }
    }

    /// Complete a login from the provider redirect.
    ///
    /// Returns the frontend URL carrying the new session token. The state is
    /// consumed before any provider call, so a failed callback cannot be replayed.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<Url, AuthError> {
        let (code, state) = params.into_grant()?;

        let verifier = self.states.consume(&state).await.ok_or_else(|| {
            warn!("Callback with unknown, consumed or expired state");
            AuthError::InvalidRequest
        })?;
        let code = code.ok_or_else(|| {
            warn!("Callback without authorization code");
            AuthError::InvalidRequest
        })?;

        let tokens = self.provider.exchange_code(&code, verifier.as_str()).await?;
        drop(verifier);
        debug!(
            "Provider tokens expire at {} (refresh token issued: {})",
            tokens.expires_at,
            tokens.refresh_token.is_some()
        );

        let access_token = tokens.access_token.as_str();
        let mut profile = self.provider.fetch_profile(access_token).await.map_err(|e| {
            warn!("Failed to fetch user profile: {}", e);
            AuthError::from(e)
        })?;

        let (groups, roles) = tokio::join!(
            async {
                if self.enrichment.groups {
                    self.provider.fetch_groups(access_token).await
                } else {
                    BTreeSet::new()
                }
            },
            async {
                if self.enrichment.roles {
                    self.provider.fetch_roles(access_token).await
                } else {
                    BTreeSet::new()
                }
            }
        );
        profile.groups = groups;
        profile.roles = roles;

        let token = self.sessions.issue(&profile, self.session_ttl)?;

        info!("Sign-in successful: {}", profile.display_name);

        let mut redirect = self.success_url.clone();
        redirect.query_pairs_mut().append_pair("token", &token);
        Ok(redirect)
    }

    /// Renew a session token, accepting one that has already expired.
    pub fn refresh_session(&self, token: &str) -> Result<RefreshedSession, AuthError> {
        let claims = self.sessions.verify_ignoring_expiry(token).map_err(|e| {
            warn!("Refresh rejected: {}", e);
            AuthError::from(e)
        })?;

        let access_token = self.sessions.reissue(claims, self.session_ttl)?;

        Ok(RefreshedSession {
            access_token,
            token_type: "bearer".into(),
            expires_in: self.session_ttl.num_seconds(),
        })
    }

    /// Identity claims of a live session token.
    pub fn current_user(&self, token: &str) -> Result<UserInfo, AuthError> {
        let claims = self.sessions.verify(token)?;
        Ok(claims.into())
    }

    /// Provider refresh-token redemption. Not supported.
    pub fn refresh_provider_token(&self) -> Result<RefreshedSession, AuthError> {
        Err(AuthError::NotImplemented)
    }
}
