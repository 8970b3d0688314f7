// HTTP interface to the signin core

use std::convert::Infallible;

use axum::{
    Form, Router,
    body::Body,
    extract::{MatchedPath, Path, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info, info_span};

use crate::auth::{
    Session, SessionError, SessionManager, UserStore, clear_session_cookie, session_cookie,
    session_token_from_headers,
};
use crate::config::Links;
use crate::signin::{ConfirmationWaiter, SigninError, SigninRequestStore};
use crate::token::TokenShape;
use crate::types::Fingerprint;

/// Wire form of one confirmation on the event stream.
pub const AUTHENTICATED_EVENT: &str = "event: authenticated\ndata:\n\n";

#[derive(Clone)]
pub struct AppState {
    pub signins: SigninRequestStore,
    pub waiter: ConfirmationWaiter,
    pub sessions: SessionManager,
    pub users: UserStore,
    pub links: Links,
    pub host_fingerprint: Fingerprint,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/fingerprint", get(host_fingerprint))
        .route("/signin-requests", post(create_signin_request))
        .route("/signin/{token}", get(signin_status).post(finalize_signin))
        .route("/signin/{token}/events", get(signin_events))
        .route("/session", get(current_session))
        .route("/signout", post(signout))
        .route("/delete-account", post(delete_account))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http().make_span_with(request_span)))
        .with_state(state)
}

/// Route template of a request, never its concrete path: paths carry tokens.
fn route_of<B>(request: &Request<B>) -> &str {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or("unmatched")
}

fn request_span<B>(request: &Request<B>) -> Span {
    info_span!("http_request", method = %request.method(), route = route_of(request))
}

/// Failure of any handler.
#[derive(Debug)]
pub enum ApiError {
    Signin(SigninError),
    Session(SessionError),
    Internal(anyhow::Error),
}

impl From<SigninError> for ApiError {
    fn from(err: SigninError) -> Self {
        Self::Signin(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Signin(err) => err.into_response(),
            Self::Session(err) => err.into_response(),
            Self::Internal(err) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct SigninRequestCreated {
    pub token: String,
    pub ssh_command: String,
    pub events_url: String,
    /// Lets the user check the host key on their first `ssh`.
    pub host_fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostFingerprint {
    pub fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SigninStatus {
    pub authenticated: bool,
    pub events_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub user_id: String,
    pub fingerprint: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CsrfForm {
    pub csrf_token: String,
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn host_fingerprint(State(state): State<AppState>) -> Json<HostFingerprint> {
    Json(HostFingerprint {
        fingerprint: state.host_fingerprint.to_string(),
    })
}

async fn create_signin_request(
    State(state): State<AppState>,
) -> ApiResult<Json<SigninRequestCreated>> {
    let request = state.signins.create().await?;
    let token = request.token();

    Ok(Json(SigninRequestCreated {
        ssh_command: state.links.ssh_command(&token),
        events_url: state.links.events_url(&token)?,
        host_fingerprint: state.host_fingerprint.to_string(),
        token,
    }))
}

async fn signin_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SigninStatus>> {
    let request = state
        .signins
        .lookup_token(&token)
        .await?
        .ok_or(SigninError::InvalidToken)?;

    Ok(Json(SigninStatus {
        authenticated: request.is_authenticated(),
        events_url: state.links.events_url(&token)?,
    }))
}

/// `text/event-stream` that emits one event per confirmation of `token`.
///
/// The stream ends when the client goes away, which drops the broker mailbox.
async fn signin_events(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let events = state.waiter.wait(&token).await?;
    let body = events
        .into_stream()
        .map(|_| Ok::<_, Infallible>(AUTHENTICATED_EVENT));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Exchange an authenticated signin token for a session.
async fn finalize_signin(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let (id, secret) = TokenShape::SIGNIN
        .split(&token)
        .ok_or(SigninError::Malformed)?;

    // The request row is gone before the session exists.
    let pubkey = state.signins.consume(id, secret).await?;
    let user = state.users.resolve_or_create(&pubkey).await?;
    let session = state.sessions.create(&user.id).await?;

    info!(user_id = %user.id, signin_id = %id, "signed in");
    Ok(redirect_home(session_cookie(&session.token())))
}

async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut session = session_from_headers(&state, &headers).await?;
    let user = state
        .users
        .get_user(session.user_id())
        .await?
        .ok_or(SessionError::InvalidSession)?;

    state.sessions.touch(&mut session).await?;

    let view = SessionView {
        user_id: user.id.to_string(),
        fingerprint: user.fingerprint().to_string(),
        csrf_token: session.csrf_token().to_string(),
    };
    Ok((
        [(header::SET_COOKIE, session_cookie(&session.token()))],
        Json(view),
    )
        .into_response())
}

async fn signout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CsrfForm>,
) -> ApiResult<Response> {
    let session = session_from_headers(&state, &headers).await?;
    state.sessions.check_csrf(&session, &form.csrf_token)?;

    state.sessions.revoke(&session).await?;
    Ok(redirect_home(clear_session_cookie()))
}

async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<CsrfForm>,
) -> ApiResult<Response> {
    let session = session_from_headers(&state, &headers).await?;
    state.sessions.check_csrf(&session, &form.csrf_token)?;

    state.users.delete_user(session.user_id()).await?;
    Ok(redirect_home(clear_session_cookie()))
}

async fn session_from_headers(state: &AppState, headers: &HeaderMap) -> Result<Session, SessionError> {
    let token = session_token_from_headers(headers).ok_or(SessionError::NotSignedIn)?;
    state.sessions.validate(&token).await
}

fn redirect_home(cookie: String) -> Response {
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/".to_string()), (header::SET_COOKIE, cookie)],
    )
        .into_response()
}
