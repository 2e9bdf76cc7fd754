//! Entra ID sign-in relay.
//!
//! Provides OAuth2 with PKCE against Microsoft Entra ID, Microsoft Graph
//! profile enrichment, and the service's own session tokens.

pub mod flow;
pub mod graph;
pub mod oauth;
pub mod pkce;
pub mod provider;
pub mod session;
pub mod state_store;
