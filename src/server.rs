//! HTTP surface of the relay.
//!
//! Thin axum handlers over [`AuthFlow`]; all decisions live in the flow.

use crate::auth::flow::{AuthFlow, CallbackParams, LoginResponse, RefreshedSession, UserInfo};
use crate::error::AuthError;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AuthFlow>,
}

/// Build the router with CORS restricted to `frontend_origin`.
pub fn build_router(state: AppState, frontend_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([frontend_origin]))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/user", get(current_user))
        .route("/auth/refresh", post(refresh))
        .route("/auth/refresh-microsoft", post(refresh_microsoft))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::TokenIssueFailed(ref e) = self {
            error!("Session token could not be issued: {}", e);
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "detail": self.user_message() }));

        if status == StatusCode::UNAUTHORIZED {
            return (status, [("www-authenticate", "Bearer")], body).into_response();
        }
        (status, body).into_response()
    }
}

/// Session token taken from an `Authorization: Bearer` header.
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::Unauthorized)?;

        let (scheme, token) = header.split_once(' ').ok_or(AuthError::Unauthorized)?;
        if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
            return Err(AuthError::Unauthorized);
        }

        Ok(Self(token.trim().to_string()))
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Microsoft OAuth relay API" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn login(State(state): State<AppState>) -> Json<LoginResponse> {
    Json(state.flow.start_login().await)
}

async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, AuthError> {
    let target = state.flow.handle_callback(params).await?;
    Ok(Redirect::temporary(target.as_str()))
}

async fn current_user(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<UserInfo>, AuthError> {
    state.flow.current_user(&token).map(Json)
}

async fn refresh(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<RefreshedSession>, AuthError> {
    state.flow.refresh_session(&token).map(Json)
}

async fn refresh_microsoft(
    State(state): State<AppState>,
) -> Result<Json<RefreshedSession>, AuthError> {
    state.flow.refresh_provider_token().map(Json)
}
