//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use crate::secure::SecureString;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Signing secret used when none is configured; only acceptable for local development.
const DEV_SIGNING_SECRET: &str = "dev-secret-key";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub enrichment: EnrichmentConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backend_url: String,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecureString,
    pub tenant: String,
    pub authority_host: String,
    pub redirect_uri: String,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

/// Optional Graph lookups folded into the session claims.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EnrichmentConfig {
    pub groups: bool,
    pub roles: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_base_url: String,
    pub http_timeout_seconds: u64,
    pub http_connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub signing_secret: SecureString,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;

        config.apply_overrides(|key| env::var(key).ok());
        config.resolve_defaults();

        // Validate required fields
        config.validate()?;

        Ok(config)
    }

    fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("MICROSOFT_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Some(secret) = lookup("MICROSOFT_CLIENT_SECRET") {
            self.oauth.client_secret = secret.into();
        }

        if let Some(tenant) = lookup("MICROSOFT_TENANT_ID") {
            self.oauth.tenant = tenant;
        }

        if let Some(redirect_uri) = lookup("MICROSOFT_REDIRECT_URI") {
            self.oauth.redirect_uri = redirect_uri;
        }

        if let Some(url) = lookup("BACKEND_URL") {
            self.server.backend_url = url;
        } else if lookup("BACKEND_HOST").is_some() || lookup("BACKEND_PORT").is_some() {
            self.server.backend_url = format!(
                "http://{}:{}",
                lookup("BACKEND_HOST").unwrap_or_else(|| "localhost".into()),
                lookup("BACKEND_PORT").unwrap_or_else(|| "8003".into())
            );
        }

        if let Some(url) = lookup("FRONTEND_URL") {
            self.server.frontend_url = url;
        } else if lookup("FRONTEND_HOST").is_some() || lookup("FRONTEND_PORT").is_some() {
            self.server.frontend_url = format!(
                "http://{}:{}",
                lookup("FRONTEND_HOST").unwrap_or_else(|| "localhost".into()),
                lookup("FRONTEND_PORT").unwrap_or_else(|| "3003".into())
            );
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            self.session.signing_secret = secret.into();
        }

        if let Some(flag) = lookup("ENABLE_GROUPS") {
            self.enrichment.groups = parse_flag(&flag);
        }

        if let Some(flag) = lookup("ENABLE_ROLES") {
            self.enrichment.roles = parse_flag(&flag);
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    fn resolve_defaults(&mut self) {
        if self.oauth.redirect_uri.is_empty() {
            self.oauth.redirect_uri = format!(
                "{}/auth/callback",
                self.server.backend_url.trim_end_matches('/')
            );
        }
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_AZURE_AD_CLIENT_ID" {
            anyhow::bail!(
                "Microsoft client_id not configured. Set MICROSOFT_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.client_secret.as_str().is_empty() {
            anyhow::bail!(
                "Microsoft client secret not configured. Set MICROSOFT_CLIENT_SECRET environment variable"
            );
        }

        if self.oauth.tenant.is_empty() {
            anyhow::bail!("Tenant not configured. Set MICROSOFT_TENANT_ID environment variable");
        }

        if self.session.signing_secret.as_str().is_empty() {
            anyhow::bail!("Session signing secret is empty. Set JWT_SECRET environment variable");
        }

        if self.session.ttl_seconds <= 0 || self.state.ttl_seconds <= 0 {
            anyhow::bail!("Session and state TTLs must be positive");
        }

        for (name, value) in [
            ("frontend_url", &self.server.frontend_url),
            ("authority_host", &self.oauth.authority_host),
            ("graph_base_url", &self.api.graph_base_url),
            ("redirect_uri", &self.oauth.redirect_uri),
        ] {
            Url::parse(value).with_context(|| format!("Invalid {}: {}", name, value))?;
        }

        Ok(())
    }

    /// Scopes requested at authorization, widened when claim enrichment is on.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes = self.oauth.scopes.scopes.clone();
        let extra = [
            (self.enrichment.groups, "Group.Read.All"),
            (self.enrichment.roles, "Directory.Read.All"),
        ];
        for (enabled, scope) in extra {
            if enabled && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// Get the authorization URL for the configured tenant.
    pub fn auth_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.oauth.authority_host.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// Get the token URL for the configured tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.oauth.authority_host.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.api.http_timeout_seconds)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.http_connect_timeout_seconds)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.ttl_seconds)
    }

    pub fn state_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.state.ttl_seconds)
    }

    /// Whether sessions are signed with the well-known development secret.
    pub fn uses_dev_signing_secret(&self) -> bool {
        self.session.signing_secret.as_str() == DEV_SIGNING_SECRET
    }

    /// Whether the backend is served over TLS (treated as production).
    pub fn is_production(&self) -> bool {
        self.server.backend_url.starts_with("https://")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
impl Config {
    /// Valid configuration pointing both the authority and Graph at `provider_url`.
    pub(crate) fn for_tests(provider_url: &str) -> Self {
        let mut config = Self::embedded().expect("embedded config parses");
        config.oauth.client_id = "test-client".into();
        config.oauth.client_secret = "test-secret".to_string().into();
        config.oauth.authority_host = provider_url.into();
        config.api.graph_base_url = provider_url.into();
        config.server.frontend_url = "http://localhost:3003".into();
        config.session.signing_secret = "test-signing-secret".to_string().into();
        config.resolve_defaults();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_parsing() {
        // Parsing works even though the placeholders fail validation
        let result = toml::from_str::<Config>(CONFIG_TOML);
        assert!(result.is_ok(), "Config parsing failed: {:?}", result.err());
    }

    #[test]
    fn test_placeholder_client_id_rejected() {
        let mut config = Config::embedded().unwrap();
        config.resolve_defaults();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_and_defaults() {
        let mut config = Config::embedded().unwrap();
        config.apply_overrides(lookup_from(&[
            ("MICROSOFT_CLIENT_ID", "client-123"),
            ("MICROSOFT_CLIENT_SECRET", "shh"),
            ("BACKEND_HOST", "api.local"),
            ("BACKEND_PORT", "9000"),
            ("FRONTEND_URL", "https://app.example.com"),
            ("JWT_SECRET", "prod-secret"),
            ("ENABLE_GROUPS", "true"),
            ("ENABLE_ROLES", "0"),
        ]));
        config.resolve_defaults();

        assert_eq!(config.oauth.client_id, "client-123");
        assert_eq!(config.oauth.client_secret.as_str(), "shh");
        assert_eq!(config.server.backend_url, "http://api.local:9000");
        assert_eq!(config.server.frontend_url, "https://app.example.com");
        assert_eq!(
            config.oauth.redirect_uri,
            "http://api.local:9000/auth/callback"
        );
        assert_eq!(config.session.signing_secret.as_str(), "prod-secret");
        assert!(config.enrichment.groups);
        assert!(!config.enrichment.roles);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_redirect_uri_kept() {
        let mut config = Config::embedded().unwrap();
        config.apply_overrides(lookup_from(&[(
            "MICROSOFT_REDIRECT_URI",
            "https://relay.example.com/api/auth/callback",
        )]));
        config.resolve_defaults();
        assert_eq!(
            config.oauth.redirect_uri,
            "https://relay.example.com/api/auth/callback"
        );
    }

    #[test]
    fn test_scopes_follow_enrichment_flags() {
        let mut config = Config::for_tests("http://127.0.0.1:1");
        assert_eq!(config.scopes(), vec!["openid", "profile", "email", "User.Read"]);

        config.enrichment.groups = true;
        config.enrichment.roles = true;
        let scopes = config.scopes();
        assert!(scopes.contains(&"Group.Read.All".to_string()));
        assert!(scopes.contains(&"Directory.Read.All".to_string()));
        assert_eq!(scopes.len(), 6);
    }

    #[test]
    fn test_urls() {
        let mut config = Config::for_tests("https://login.microsoftonline.com/");
        config.oauth.tenant = "test-tenant".into();

        assert_eq!(
            config.auth_url(),
            "https://login.microsoftonline.com/test-tenant/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/test-tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_dev_signing_secret_detected() {
        let mut config = Config::embedded().unwrap();
        assert!(config.uses_dev_signing_secret());
        config.apply_overrides(lookup_from(&[("JWT_SECRET", "rotated")]));
        assert!(!config.uses_dev_signing_secret());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = Config::for_tests("http://127.0.0.1:1");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("test-secret"));
        assert!(!debug.contains("test-signing-secret"));
    }
}
