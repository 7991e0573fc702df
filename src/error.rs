use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a call against one of the Google REST APIs
///
/// Every variant renders to a single user-facing string; callers show it in a
/// notification and never retry.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No bearer token was available, so no request was sent
    #[error("No access token provided")]
    MissingToken,

    /// The remote service answered with a non-success status
    #[error("{context}: {status}")]
    Status { context: String, status: StatusCode },

    /// A tab title did not match any sheet in the spreadsheet metadata
    #[error("Could not find sheet with title: {0}")]
    SheetNotFound(String),

    /// The request could not be sent or the body could not be decoded
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    pub fn status(context: impl Into<String>, status: StatusCode) -> Self {
        ApiError::Status {
            context: context.into(),
            status,
        }
    }
}

/// Resolve an optional session token into a bearer credential
///
/// An absent or blank token short-circuits with [`ApiError::MissingToken`]
/// before any network traffic.
pub fn bearer(access_token: Option<&str>) -> Result<&str, ApiError> {
    match access_token {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(ApiError::MissingToken),
    }
}

/// First few characters of a token, for log lines
pub(crate) fn token_hint(token: &str) -> String {
    let prefix: String = token.chars().take(5).collect();
    format!("{}...", prefix)
}
