//! Identity provider seam used by the login flow.

use crate::auth::graph::{GraphClient, UserProfile};
use crate::auth::oauth::{OAuth2Client, ProviderTokenSet};
use crate::config::Config;
use crate::error::{ApiError, AuthError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use url::Url;

/// Operations the flow needs from an OAuth2 identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization URL for the given state and S256 challenge.
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url;

    /// Redeem an authorization code with its PKCE verifier.
    async fn exchange_code(&self, code: &str, verifier: &str)
        -> Result<ProviderTokenSet, AuthError>;

    /// Profile of the user the access token belongs to.
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    /// Group names; empty on any failure.
    async fn fetch_groups(&self, access_token: &str) -> BTreeSet<String>;

    /// Role names; empty on any failure.
    async fn fetch_roles(&self, access_token: &str) -> BTreeSet<String>;
}

/// Microsoft Entra ID with Microsoft Graph for profile data.
pub struct EntraIdProvider {
    oauth: OAuth2Client,
    graph: GraphClient,
}

impl EntraIdProvider {
    /// Build both clients over one bounded-timeout HTTP client.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.http_connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            oauth: OAuth2Client::new(config, http_client.clone())?,
            graph: GraphClient::new(&config.api.graph_base_url, http_client),
        })
    }
}

#[async_trait]
impl IdentityProvider for EntraIdProvider {
    fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        self.oauth.authorization_url(state, code_challenge)
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<ProviderTokenSet, AuthError> {
        self.oauth.exchange_code(code, verifier).await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        self.graph.get_user_profile(access_token).await
    }

    async fn fetch_groups(&self, access_token: &str) -> BTreeSet<String> {
        self.graph.get_groups(access_token).await
    }

    async fn fetch_roles(&self, access_token: &str) -> BTreeSet<String> {
        self.graph.get_roles(access_token).await
    }
}
