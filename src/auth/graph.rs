//! Microsoft Graph API client for fetching the user profile and memberships.

use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Upper bound on `@odata.nextLink` pages followed for one membership query.
const MAX_PAGES: usize = 10;

/// Identity derived from Graph responses during callback handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub provider_user_id: String,
    pub email: String,
    pub display_name: String,
    pub groups: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

/// User resource from the Graph `/me` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: Option<String>,
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

impl GraphUser {
    /// `id` and `displayName` are required; email falls back to the UPN.
    fn into_profile(self) -> Result<UserProfile, ApiError> {
        let provider_user_id = self
            .id
            .ok_or_else(|| ApiError::ParseFailed("Profile has no id".to_string()))?;
        let display_name = self
            .display_name
            .ok_or_else(|| ApiError::ParseFailed("Profile has no displayName".to_string()))?;
        let email = self
            .mail
            .filter(|m| !m.is_empty())
            .or(self.user_principal_name.filter(|u| !u.is_empty()))
            .ok_or_else(|| ApiError::ParseFailed("Profile has no mail or UPN".to_string()))?;

        Ok(UserProfile {
            provider_user_id,
            email,
            display_name,
            groups: BTreeSet::new(),
            roles: BTreeSet::new(),
        })
    }
}

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
struct CollectionPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Group or directory role; only the name is selected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryObject {
    display_name: Option<String>,
}

/// Microsoft Graph API client.
pub struct GraphClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl GraphClient {
    /// Create a new Graph client against `base_url` (e.g. `https://graph.microsoft.com/v1.0`).
    pub fn new(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Fetch the current user's profile.
    pub async fn get_user_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let url = format!("{}/me", self.base_url);
        let user: GraphUser = self.get_json(&url, access_token).await?;
        user.into_profile()
    }

    /// Names of the security and Microsoft 365 groups the user belongs to.
    ///
    /// Best-effort: failures are logged and yield an empty set.
    pub async fn get_groups(&self, access_token: &str) -> BTreeSet<String> {
        let url = format!(
            "{}/me/memberOf/microsoft.graph.group?$select=displayName",
            self.base_url
        );
        self.member_names(&url, access_token, "groups").await
    }

    /// Names of the directory roles assigned to the user.
    ///
    /// Best-effort: failures are logged and yield an empty set.
    pub async fn get_roles(&self, access_token: &str) -> BTreeSet<String> {
        let url = format!(
            "{}/me/memberOf/microsoft.graph.directoryRole?$select=displayName",
            self.base_url
        );
        self.member_names(&url, access_token, "roles").await
    }

    async fn member_names(&self, url: &str, access_token: &str, what: &str) -> BTreeSet<String> {
        match self.collect_pages(url, access_token).await {
            Ok(names) => {
                debug!("Fetched {} {}", names.len(), what);
                names
            }
            Err(e) => {
                warn!("Failed to fetch {}, continuing without them: {}", what, e);
                BTreeSet::new()
            }
        }
    }

    async fn collect_pages(
        &self,
        first_url: &str,
        access_token: &str,
    ) -> Result<BTreeSet<String>, ApiError> {
        let mut names = BTreeSet::new();
        let mut next = Some(first_url.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                warn!("Stopped following membership pages after {}", MAX_PAGES);
                break;
            }
            pages += 1;

            let page: CollectionPage<DirectoryObject> = self.get_json(&url, access_token).await?;
            names.extend(page.value.into_iter().filter_map(|o| o.display_name));
            next = page.next_link;
        }

        Ok(names)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| ApiError::ParseFailed(e.to_string())),
            401 => Err(ApiError::Unauthorized),
            403 => Err(ApiError::Forbidden),
            429 => Err(ApiError::RateLimited),
            // Don't expose raw API error details - just log status code
            status => Err(ApiError::GraphRequestFailed(format!("HTTP {}", status))),
        }
    }
}
