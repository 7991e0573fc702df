#![cfg(not(tarpaulin_include))]

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::error::{ApiError, bearer};

// Constants
pub const SESSION_COOKIE: &str = "session";
pub const SIGN_IN_PATH: &str = "/auth/signin";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
const DEFAULT_TOKEN_LIFETIME: u64 = 60 * 60;
const SIGN_IN_STATE_TTL: u64 = 10 * 60;

/// Scopes requested at consent time
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/spreadsheets.readonly",
];

/// Problems the session layer reports about its access token
///
/// Reported only; nothing triggers a new sign-in automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    RefreshAccessTokenError,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::RefreshAccessTokenError => f.write_str("RefreshAccessTokenError"),
        }
    }
}

/// User session data
///
/// Represents a signed-in Google account and the access token issued to it.
#[derive(Debug, Clone)]
pub struct Session {
    /// Google account subject id
    pub user_id: String,

    pub name: Option<String>,

    pub email: Option<String>,

    /// Bearer token for Drive and Sheets calls
    pub access_token: Option<String>,

    /// When Google stops accepting `access_token`
    pub access_token_expires: SystemTime,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

impl Session {
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// The stale token is still handed out; callers only display the error.
    pub fn token_error(&self) -> Option<TokenError> {
        if SystemTime::now() >= self.access_token_expires {
            Some(TokenError::RefreshAccessTokenError)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(self.user_id.as_str())
    }
}

/// In-memory session storage shared by all request handlers
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    pending: RwLock<HashMap<String, SystemTime>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session for a signed-in user
    ///
    /// Expired sessions are evicted on the way in.
    ///
    /// # Arguments
    /// * `session` - The session to store
    ///
    /// # Returns
    /// * `String` - The new session id, used as the cookie value
    pub fn create_session(&self, session: Session) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, existing| existing.expires_at > now);
        sessions.insert(session_id.clone(), session);
        session_id
    }

    /// Validate a session id
    ///
    /// # Arguments
    /// * `session_id` - The cookie value to look up
    ///
    /// # Returns
    /// * `Option<Session>` - The session if it exists and has not expired
    pub fn validate_session(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .filter(|session| session.expires_at > SystemTime::now())
            .cloned()
    }

    pub fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    /// Register a fresh CSRF `state` value for the consent round-trip
    pub fn begin_sign_in(&self) -> String {
        let state = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, issued| {
            now.duration_since(*issued)
                .map(|age| age.as_secs() < SIGN_IN_STATE_TTL)
                .unwrap_or(true)
        });
        pending.insert(state.clone(), now);
        state
    }

    /// Consume a `state` value; each one is accepted once
    pub fn finish_sign_in(&self, state: &str) -> bool {
        let mut pending = self.pending.write().unwrap_or_else(|e| e.into_inner());
        match pending.remove(state) {
            Some(issued) => SystemTime::now()
                .duration_since(issued)
                .map(|age| age.as_secs() < SIGN_IN_STATE_TTL)
                .unwrap_or(true),
            None => false,
        }
    }

    /// Resolve the session named by the request cookie
    pub fn from_jar(&self, jar: &CookieJar) -> Option<Session> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| self.validate_session(cookie.value()))
    }
}

/// Token endpoint answer to an authorization-code exchange
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Profile returned by the userinfo endpoint
#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Google OAuth 2.0 authorization-code client
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
}

impl OAuthClient {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri(),
            authorize_url: config.endpoints.authorize.clone(),
            token_url: config.endpoints.token.clone(),
            userinfo_url: config.endpoints.userinfo.clone(),
        }
    }

    /// Consent screen URL carrying `state`
    pub fn authorization_url(&self, state: &str) -> String {
        let scope = SCOPES.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("prompt", "consent"),
            ("access_type", "offline"),
            ("state", state),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.authorize_url, query)
    }

    /// Trade an authorization code for tokens
    ///
    /// # Arguments
    /// * `code` - The code Google passed to the callback
    ///
    /// # Returns
    /// * `Result<TokenResponse, ApiError>` - The issued tokens or the failure
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ApiError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Token exchange error response: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("Token exchange failed", status));
        }

        Ok(response.json().await?)
    }

    pub async fn fetch_user(&self, access_token: &str) -> Result<UserInfo, ApiError> {
        let token = bearer(Some(access_token))?;
        let response = self.http.get(&self.userinfo_url).bearer_auth(token).send().await?;

        if !response.status().is_success() {
            return Err(ApiError::status("Failed to fetch user profile", response.status()));
        }

        Ok(response.json().await?)
    }

    /// Build a session from a completed consent round-trip
    ///
    /// # Arguments
    /// * `code` - The code Google passed to the callback
    ///
    /// # Returns
    /// * `Result<Session, ApiError>` - A session holding the user profile and
    ///   access token, or the first failure of the exchange
    pub async fn sign_in(&self, code: &str) -> Result<Session, ApiError> {
        let tokens = self.exchange_code(code).await?;
        let user = self.fetch_user(&tokens.access_token).await?;
        let now = SystemTime::now();

        if tokens.refresh_token.is_some() {
            log::debug!("Refresh token issued for {} but not kept", user.sub);
        }

        Ok(Session {
            user_id: user.sub,
            name: user.name,
            email: user.email,
            access_token: Some(tokens.access_token),
            access_token_expires: now
                + Duration::from_secs(tokens.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME)),
            expires_at: now + Duration::from_secs(SESSION_DURATION),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Start the Google consent round-trip
pub async fn handle_google_sign_in(State(state): State<Arc<AppState>>) -> Redirect {
    let csrf = state.sessions.begin_sign_in();
    Redirect::to(&state.oauth.authorization_url(&csrf))
}

/// Handle the redirect back from Google
///
/// Exchanges the code, stores the session and sets the session cookie.
pub async fn handle_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        log::warn!("Google sign-in was refused: {}", error);
        return Redirect::to(&format!("{}?error={}", SIGN_IN_PATH, urlencoding::encode(&error)))
            .into_response();
    }

    let csrf_ok = query
        .state
        .as_deref()
        .is_some_and(|csrf| state.sessions.finish_sign_in(csrf));
    if !csrf_ok {
        return (StatusCode::BAD_REQUEST, "Invalid sign-in state").into_response();
    }

    let Some(code) = query.code else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    match state.oauth.sign_in(&code).await {
        Ok(session) => {
            log::info!("Signed in {}", session.display_name());
            let session_id = state.sessions.create_session(session);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            (jar.add(cookie), Redirect::to("/drive")).into_response()
        }
        Err(e) => {
            log::error!("Sign-in failed: {}", e);
            Redirect::to(&format!(
                "{}?error={}",
                SIGN_IN_PATH,
                urlencoding::encode(&e.to_string())
            ))
            .into_response()
        }
    }
}

/// Handle user logout
///
/// Drops the server-side session, clears the cookie and returns home.
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove_session(cookie.value());
    }

    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

/// Authentication middleware
///
/// Lets requests with a valid session through, with the [`Session`] in the
/// request extensions. Everything else is redirected to the sign-in page.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(session) = state.sessions.from_jar(&jar) {
        request.extensions_mut().insert(session);
        return next.run(request).await;
    }

    log::debug!("Redirecting unauthenticated request for {}", request.uri().path());
    Redirect::to(SIGN_IN_PATH).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> Config {
        Config {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            app_url: "http://localhost:3000".into(),
            bind_addr: "127.0.0.1:0".into(),
            endpoints: Endpoints::all_at(base),
        }
    }

    fn session_expiring_in(token_secs: i64) -> Session {
        let now = SystemTime::now();
        let token_expiry = if token_secs >= 0 {
            now + Duration::from_secs(token_secs as u64)
        } else {
            now - Duration::from_secs((-token_secs) as u64)
        };
        Session {
            user_id: "1098".into(),
            name: None,
            email: Some("ada@example.com".into()),
            access_token: Some("tok".into()),
            access_token_expires: token_expiry,
            expires_at: now + Duration::from_secs(SESSION_DURATION),
        }
    }

    #[test]
    fn sessions_round_trip_and_expire() {
        let store = SessionStore::new();
        let id = store.create_session(session_expiring_in(3600));
        assert_eq!(store.validate_session(&id).unwrap().user_id, "1098");

        let mut expired = session_expiring_in(3600);
        expired.expires_at = SystemTime::now() - Duration::from_secs(1);
        let stale_id = store.create_session(expired);
        assert!(store.validate_session(&stale_id).is_none());

        store.remove_session(&id);
        assert!(store.validate_session(&id).is_none());
        assert!(store.validate_session("unknown").is_none());
    }

    #[test]
    fn expired_sessions_are_evicted_on_create() {
        let store = SessionStore::new();
        let mut expired = session_expiring_in(3600);
        expired.expires_at = SystemTime::now() - Duration::from_secs(1);
        let stale_id = store.create_session(expired);
        let live_id = store.create_session(session_expiring_in(3600));

        let sessions = store.sessions.read().unwrap();
        assert!(!sessions.contains_key(&stale_id));
        assert!(sessions.contains_key(&live_id));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn expired_token_is_tagged_but_still_exposed() {
        let session = session_expiring_in(-5);
        assert_eq!(session.token_error(), Some(TokenError::RefreshAccessTokenError));
        assert_eq!(session.access_token(), Some("tok"));
        assert_eq!(session_expiring_in(600).token_error(), None);
        assert_eq!(session.display_name(), "ada@example.com");
    }

    #[test]
    fn sign_in_state_is_single_use() {
        let store = SessionStore::new();
        let state = store.begin_sign_in();
        assert!(store.finish_sign_in(&state));
        assert!(!store.finish_sign_in(&state));
        assert!(!store.finish_sign_in("forged"));
    }

    #[test]
    fn authorization_url_carries_offline_consent() {
        let oauth = OAuthClient::new(Client::new(), &config("https://accounts.example"));
        let url = oauth.authorization_url("xyz");

        assert!(url.starts_with("https://accounts.example/o/oauth2/v2/auth?client_id=client-123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fauth%2Fcallback%2Fgoogle"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains(&urlencoding::encode("https://www.googleapis.com/auth/spreadsheets").into_owned()));
    }

    #[tokio::test]
    async fn sign_in_exchanges_code_and_loads_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=4%2F0Abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
                "refresh_token": "1//r",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer ya29.fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "1098", "name": "Ada Lovelace", "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(Client::new(), &config(&server.uri()));
        let session = oauth.sign_in("4/0Abc").await.unwrap();

        assert_eq!(session.user_id, "1098");
        assert_eq!(session.display_name(), "Ada Lovelace");
        assert_eq!(session.access_token(), Some("ya29.fresh"));
        assert_eq!(session.token_error(), None);
    }

    #[tokio::test]
    async fn failed_exchange_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(Client::new(), &config(&server.uri()));
        let err = oauth.sign_in("bad").await.unwrap_err();
        assert_eq!(err.to_string(), "Token exchange failed: 400 Bad Request");
    }
}
