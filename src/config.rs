use thiserror::Error;

const DEFAULT_APP_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Base URLs of every remote service the dashboard talks to
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub drive: String,
    pub drive_upload: String,
    pub sheets: String,
    pub authorize: String,
    pub token: String,
    pub userinfo: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            drive: "https://www.googleapis.com/drive/v3".to_string(),
            drive_upload: "https://www.googleapis.com/upload/drive/v3".to_string(),
            sheets: "https://sheets.googleapis.com/v4".to_string(),
            authorize: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token: "https://oauth2.googleapis.com/token".to_string(),
            userinfo: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at one base URL (a local mock server)
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            drive: base.to_string(),
            drive_upload: base.to_string(),
            sheets: base.to_string(),
            authorize: format!("{}/o/oauth2/v2/auth", base),
            token: format!("{}/token", base),
            userinfo: format!("{}/userinfo", base),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth client id issued by the Google console
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Public URL the browser reaches the dashboard on
    pub app_url: String,

    /// Socket address the server listens on
    pub bind_addr: String,

    pub endpoints: Endpoints,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let client_id = get("GOOGLE_CLIENT_ID").ok_or(ConfigError::Missing("GOOGLE_CLIENT_ID"))?;
        let client_secret =
            get("GOOGLE_CLIENT_SECRET").ok_or(ConfigError::Missing("GOOGLE_CLIENT_SECRET"))?;

        let mut endpoints = Endpoints::default();
        if let Some(drive) = get("GOOGLE_DRIVE_API") {
            endpoints.drive = drive;
        }
        if let Some(upload) = get("GOOGLE_DRIVE_UPLOAD_API") {
            endpoints.drive_upload = upload;
        }
        if let Some(sheets) = get("GOOGLE_SHEETS_API") {
            endpoints.sheets = sheets;
        }

        Ok(Config {
            client_id,
            client_secret,
            app_url: get("APP_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            endpoints,
        })
    }

    /// Where Google sends the browser back after consent
    pub fn redirect_uri(&self) -> String {
        format!("{}/api/auth/callback/google", self.app_url)
    }
}
