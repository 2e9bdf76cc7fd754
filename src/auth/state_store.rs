//! Correlation of in-flight authorization requests with their PKCE verifiers.
//!
//! A state token is handed out at login start and redeemed exactly once at the
//! callback. Entries older than the configured TTL are treated as unknown.

use crate::auth::pkce::PkceChallenge;
use crate::secure::SecureString;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Random bytes behind a state token (256 bits).
const STATE_BYTES: usize = 32;

/// What the caller needs to build the authorization URL.
#[derive(Debug, Clone)]
pub struct IssuedState {
    pub state: String,
    pub code_challenge: String,
}

/// A pending authorization request, owned by the store.
#[derive(Debug)]
struct AuthorizationRequest {
    code_verifier: SecureString,
    created_at: DateTime<Utc>,
}

/// Storage for pending authorization requests.
///
/// Implementations must make `consume` atomic: a state is returned at most once.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Register a new authorization request and return its state and PKCE challenge.
    async fn create(&self) -> IssuedState;

    /// Remove the request for `state` and return its verifier.
    ///
    /// `None` for unknown, already consumed, or expired states.
    async fn consume(&self, state: &str) -> Option<SecureString>;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> usize;

    /// Number of pending entries.
    async fn len(&self) -> usize;
}

/// Process-local state store.
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, AuthorizationRequest>>,
    ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, request: &AuthorizationRequest, now: DateTime<Utc>) -> bool {
        now - request.created_at > self.ttl
    }

    fn purge_locked(&self, entries: &mut HashMap<String, AuthorizationRequest>) -> usize {
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, request| !self.is_expired(request, now));
        before - entries.len()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create(&self) -> IssuedState {
        let pkce = PkceChallenge::new();

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let purged = self.purge_locked(&mut entries);
        if purged > 0 {
            debug!("Purged {} expired authorization states", purged);
        }

        // Collisions are astronomically unlikely, but never overwrite a live entry
        let state = loop {
            let candidate = generate_state();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        entries.insert(
            state.clone(),
            AuthorizationRequest {
                code_verifier: pkce.verifier,
                created_at: Utc::now(),
            },
        );

        IssuedState {
            state,
            code_challenge: pkce.challenge,
        }
    }

    async fn consume(&self, state: &str) -> Option<SecureString> {
        let request = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state)?;

        if self.is_expired(&request, Utc::now()) {
            debug!("Rejected expired authorization state");
            return None;
        }

        Some(request.code_verifier)
    }

    async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.purge_locked(&mut entries)
    }

    async fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Periodically drop authorization states abandoned mid-login.
pub fn spawn_sweeper(states: Arc<dyn StateStore>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            interval.tick().await;
            let purged = states.purge_expired().await;
            if purged > 0 {
                debug!(
                    "Swept {} expired authorization states, {} pending",
                    purged,
                    states.len().await
                );
            }
        }
    })
}

fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
