//! Error types for the entra-relay service.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Failures of the login, refresh and user-info flows.
///
/// Every variant is terminal for the request that produced it; nothing is retried.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Provider returned an OAuth error: {0}")]
    ProviderError(String),

    #[error("Invalid or replayed callback request")]
    InvalidRequest,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(#[from] ApiError),

    #[error("Session token missing or invalid")]
    Unauthorized,

    #[error("Provider token refresh is not implemented")]
    NotImplemented,

    #[error("Failed to issue session token: {0}")]
    TokenIssueFailed(SessionTokenError),
}

/// Microsoft Graph API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

/// Reasons a session token is rejected or cannot be minted.
#[derive(Error, Debug)]
pub enum SessionTokenError {
    #[error("signature does not match")]
    Signature,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("signing failed: {0}")]
    Signing(String),
}

impl AuthError {
    /// Returns the message shown to the caller.
    ///
    /// Exchange and Graph details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderError(code) => format!("OAuth Error: {}", code),
            Self::InvalidRequest => "Invalid request".into(),
            Self::TokenExchangeFailed(_) => "Token exchange failed".into(),
            Self::ProfileFetchFailed(_) => "Failed to get user info".into(),
            Self::Unauthorized => "Invalid token".into(),
            Self::NotImplemented => "Microsoft token refresh is not implemented".into(),
            Self::TokenIssueFailed(_) => "Internal server error".into(),
        }
    }

    /// HTTP status code the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ProviderError(_)
            | Self::InvalidRequest
            | Self::TokenExchangeFailed(_)
            | Self::ProfileFetchFailed(_) => 400,
            Self::Unauthorized => 401,
            Self::NotImplemented => 501,
            Self::TokenIssueFailed(_) => 500,
        }
    }
}

impl From<SessionTokenError> for AuthError {
    /// Verification failures collapse to `Unauthorized`; only signing is a server fault.
    fn from(err: SessionTokenError) -> Self {
        match err {
            SessionTokenError::Signing(_) => Self::TokenIssueFailed(err),
            _ => Self::Unauthorized,
        }
    }
}
