//! OAuth2 confidential client for the Microsoft identity platform.

use crate::config::Config;
use crate::error::AuthError;
use crate::secure::SecureString;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;

/// Tokens returned by the token endpoint.
///
/// Lives only for the duration of one callback; never persisted or returned.
#[derive(Debug)]
pub struct ProviderTokenSet {
    pub access_token: SecureString,
    pub refresh_token: Option<SecureString>,
    pub expires_at: DateTime<Utc>,
}

/// Token response from the token endpoint.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
    refresh_token: Option<String>,
}

impl From<TokenResponse> for ProviderTokenSet {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token.into(),
            refresh_token: response.refresh_token.map(SecureString::from),
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        }
    }
}

/// OAuth2 client for Entra ID authentication.
pub struct OAuth2Client {
    client_id: String,
    client_secret: SecureString,
    redirect_uri: String,
    scopes: Vec<String>,
    authorize_endpoint: Url,
    token_endpoint: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config, http_client: reqwest::Client) -> Result<Self> {
        let authorize_endpoint =
            Url::parse(&config.auth_url()).context("Invalid authorization endpoint")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            scopes: config.scopes(),
            authorize_endpoint,
            token_endpoint: config.token_url(),
            http_client,
        })
    }

    /// Build the authorization URL the end user is sent to.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.authorize_endpoint.clone();

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");

        url
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<ProviderTokenSet, AuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
        ];

        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token exchange failed: HTTP {} - {}", status, error_body);
            return Err(AuthError::TokenExchangeFailed(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        Ok(token_response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::collections::HashMap;

    fn client(provider_url: &str) -> OAuth2Client {
        let config = Config::for_tests(provider_url);
        OAuth2Client::new(&config, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let client = client("https://login.microsoftonline.com");
        let url = client.authorization_url("state-abc", "challenge-xyz");

        assert_eq!(
            url.path(),
            "/organizations/oauth2/v2.0/authorize"
        );
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "test-client");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:8003/auth/callback");
        assert_eq!(params["scope"], "openid profile email User.Read");
        assert_eq!(params["state"], "state-abc");
        assert_eq!(params["code_challenge"], "challenge-xyz");
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(!params.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/organizations/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth-code".into()),
                Matcher::UrlEncoded("code_verifier".into(), "the-verifier".into()),
                Matcher::UrlEncoded("client_secret".into(), "test-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","token_type":"Bearer","expires_in":3600,"refresh_token":"rt-1"}"#,
            )
            .create_async()
            .await;

        let tokens = client(&server.url())
            .exchange_code("auth-code", "the-verifier")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token.as_str(), "at-1");
        assert_eq!(tokens.refresh_token.as_ref().map(|t| t.as_str()), Some("rt-1"));
        assert!(tokens.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/organizations/oauth2/v2.0/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let result = client(&server.url())
            .exchange_code("stale-code", "verifier")
            .await;

        match result {
            Err(AuthError::TokenExchangeFailed(detail)) => assert_eq!(detail, "HTTP 400"),
            other => panic!("expected exchange failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_unparseable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/organizations/oauth2/v2.0/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = client(&server.url()).exchange_code("code", "verifier").await;
        assert!(matches!(result, Err(AuthError::TokenExchangeFailed(_))));
    }
}
