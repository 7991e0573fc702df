use axum::{
    Extension, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderName, StatusCode, header},
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::Form;
use axum_extra::extract::cookie::CookieJar;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::downloader;
use crate::drive::{DriveClient, DriveFile, XLSX_MIME};
use crate::login::{self, OAuthClient, Session, SessionStore};
use crate::pages::render;
use crate::patient::{self, NewPatient};
use crate::sheets::{SheetRow, SheetsClient};
use crate::view::{
    NoticeKind, Notification, data_dimension_index, data_row_number, filter_rows, pick_active_sheet,
};

const UPLOAD_LIMIT: usize = 25 * 1024 * 1024;
const MISSING_TOKEN_MESSAGE: &str =
    "Access token is missing. You may need to sign out and sign in again.";

pub struct AppState {
    pub config: Config,
    pub drive: DriveClient,
    pub sheets: SheetsClient,
    pub oauth: OAuthClient,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http = Client::new();
        Self {
            drive: DriveClient::new(http.clone(), &config.endpoints),
            sheets: SheetsClient::new(http.clone(), &config.endpoints),
            oauth: OAuthClient::new(http, &config),
            sessions: SessionStore::new(),
            config,
        }
    }
}

#[derive(Deserialize)]
struct NoticeQuery {
    notice: Option<String>,
    kind: Option<NoticeKind>,
}

impl NoticeQuery {
    fn notification(&self) -> Option<Notification> {
        Notification::from_query(self.notice.as_deref(), self.kind)
    }
}

#[derive(Deserialize)]
struct SignInQuery {
    error: Option<String>,
}

#[derive(Deserialize)]
struct FileQuery {
    sheet: Option<String>,
    #[serde(default)]
    search: String,
    notice: Option<String>,
    kind: Option<NoticeKind>,
}

#[derive(Deserialize)]
struct SheetQuery {
    sheet: String,
}

#[derive(Deserialize)]
struct ReturnTo {
    sheet: Option<String>,
}

#[derive(Deserialize)]
struct ExportQuery {
    sheet: Option<String>,
    format: Option<String>,
}

#[derive(Deserialize)]
struct DownloadQuery {
    name: Option<String>,
    format: Option<String>,
}

#[derive(Deserialize)]
struct RowEdit {
    #[serde(default)]
    values: Vec<String>,
}

/// Build the application router
///
/// `/drive` and `/file` routes sit behind [`login::require_auth`]; the rest
/// are public.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/drive", get(serve_drive))
        .route(
            "/drive/upload",
            post(upload_file).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/drive/files/:id/download", get(download_file))
        .route("/drive/files/:id/delete", post(delete_file))
        .route("/file/:id", get(serve_file))
        .route("/file/:id/patients", post(add_patient))
        .route("/file/:id/rows/:index/update", post(update_row))
        .route("/file/:id/rows/:index/delete", post(delete_row))
        .route("/file/:id/export", get(export_sheet))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth,
        ));

    Router::new()
        .route("/", get(serve_landing))
        .route("/privacy", get(serve_privacy))
        .route("/auth/signin", get(serve_sign_in))
        .route("/auth/google", get(login::handle_google_sign_in))
        .route("/api/auth/callback/google", get(login::handle_callback))
        .route(
            "/auth/signout",
            get(login::handle_logout).post(login::handle_logout),
        )
        .merge(protected)
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let app_url = config.app_url.clone();
    let app = router(Arc::new(AppState::new(config)));

    // Start server
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on {} (public URL {})", bind_addr, app_url);
    axum::serve(listener, app).await?;

    Ok(())
}

fn file_href(file_id: &str, sheet: Option<&str>, notice: Option<&Notification>) -> String {
    let mut params = Vec::new();
    if let Some(sheet) = sheet {
        params.push(format!("sheet={}", urlencoding::encode(sheet)));
    }
    if let Some(notice) = notice {
        params.push(notice.to_query());
    }

    let base = format!("/file/{}", urlencoding::encode(file_id));
    if params.is_empty() {
        base
    } else {
        format!("{}?{}", base, params.join("&"))
    }
}

/// Download link for a Drive entry
///
/// Native spreadsheets have no binary content, so their link asks for an
/// XLSX export instead.
fn download_href(file: &DriveFile) -> String {
    let mut href = format!(
        "/drive/files/{}/download?name={}",
        urlencoding::encode(&file.id),
        urlencoding::encode(&file.name)
    );
    if file.is_spreadsheet() {
        href.push_str("&format=xlsx");
    }
    href
}

fn drive_redirect(notice: Notification) -> Redirect {
    Redirect::to(&format!("/drive?{}", notice.to_query()))
}

fn attachment(content_type: &str, filename: &str, body: Vec<u8>) -> Response {
    let headers: [(HeaderName, String); 2] = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename.replace('"', "")),
        ),
    ];
    (StatusCode::OK, headers, body).into_response()
}

async fn serve_landing(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = state.sessions.from_jar(&jar);
    render(
        "landing",
        &json!({
            "title": "Home",
            "user": session.as_ref().map(Session::display_name),
        }),
    )
}

async fn serve_privacy(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = state.sessions.from_jar(&jar);
    render(
        "privacy",
        &json!({
            "title": "Privacy",
            "user": session.as_ref().map(Session::display_name),
        }),
    )
}

async fn serve_sign_in(Query(query): Query<SignInQuery>) -> Response {
    render(
        "signin",
        &json!({ "title": "Sign in", "error": query.error }),
    )
}

async fn serve_drive(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let mut files: Vec<DriveFile> = Vec::new();
    let mut error = None;
    let mut refreshed_at = None;

    if session.access_token().is_none() {
        error = Some(MISSING_TOKEN_MESSAGE.to_string());
    } else {
        match state.drive.list_files(session.access_token()).await {
            Ok(listed) => {
                files = listed;
                refreshed_at = Some(chrono::Local::now().format("%H:%M:%S").to_string());
            }
            Err(e) => {
                log::error!("Error fetching files: {}", e);
                error = Some("Failed to load files from Google Drive.".to_string());
            }
        }
    }

    let rows: Vec<_> = files
        .iter()
        .map(|file| {
            json!({
                "id": file.id,
                "name": file.name,
                "mimeType": file.mime_type,
                "webViewLink": file.web_view_link,
                "download_href": download_href(file),
            })
        })
        .collect();

    render(
        "drive",
        &json!({
            "title": "My Drive",
            "user": session.display_name(),
            "notice": query.notification(),
            "token_error": session.token_error().map(|e| e.to_string()),
            "files": rows,
            "error": error,
            "refreshed_at": refreshed_at,
        }),
    )
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> Redirect {
    let mut upload = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let name = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((name, mime, bytes.to_vec())),
                    Err(e) => {
                        log::error!("Failed to read upload: {}", e);
                        return drive_redirect(Notification::error(format!(
                            "Failed to upload file: {}",
                            e
                        )));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::error!("Malformed upload: {}", e);
                return drive_redirect(Notification::error(format!(
                    "Failed to upload file: {}",
                    e
                )));
            }
        }
    }

    let Some((name, mime, bytes)) = upload.filter(|(_, _, bytes)| !bytes.is_empty()) else {
        return drive_redirect(Notification::error("No file selected"));
    };

    match state
        .drive
        .upload_file(session.access_token(), &name, &mime, bytes)
        .await
    {
        Ok(file) => {
            log::info!("Uploaded {} as {}", name, file.id);
            drive_redirect(Notification::success("File uploaded successfully"))
        }
        Err(e) => drive_redirect(Notification::error(format!("Failed to upload file: {}", e))),
    }
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(file_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let token = session.access_token();
    let name = query.name.unwrap_or_else(|| file_id.clone());

    let result = match query.format.as_deref() {
        Some("xlsx") => state
            .drive
            .export_file(token, &file_id, XLSX_MIME)
            .await
            .map(|bytes| attachment(XLSX_MIME, &format!("{}.xlsx", name), bytes)),
        _ => state
            .drive
            .download_file(token, &file_id)
            .await
            .map(|bytes| attachment("application/octet-stream", &name, bytes)),
    };

    match result {
        Ok(response) => response,
        Err(e) => drive_redirect(Notification::error(e.to_string())).into_response(),
    }
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(file_id): Path<String>,
) -> Redirect {
    match state
        .drive
        .delete_file(session.access_token(), &file_id)
        .await
    {
        Ok(()) => drive_redirect(Notification::success("File deleted successfully")),
        Err(e) => drive_redirect(Notification::error(e.to_string())),
    }
}

fn render_file_error(session: &Session, file_id: &str, error: String) -> Response {
    render(
        "file",
        &json!({
            "title": "Spreadsheet",
            "user": session.display_name(),
            "token_error": session.token_error().map(|e| e.to_string()),
            "file_id": file_id,
            "error": error,
        }),
    )
}

/// Pad every row to the header width so edit forms expose all columns
fn pad_row(mut row: SheetRow, width: usize) -> SheetRow {
    if row.len() < width {
        row.resize(width, String::new());
    }
    row
}

async fn serve_file(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(file_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Response {
    let token = session.access_token();

    let sheets = match state.sheets.get_available_sheets(token, &file_id).await {
        Ok(sheets) => sheets,
        Err(e) => return render_file_error(&session, &file_id, e.to_string()),
    };

    let active = query
        .sheet
        .as_deref()
        .filter(|requested| sheets.iter().any(|s| s.title == *requested))
        .or_else(|| pick_active_sheet(&sheets))
        .map(str::to_string);

    let values = match &active {
        Some(title) => match state.sheets.fetch_sheet_data(token, &file_id, title).await {
            Ok(values) => values,
            Err(e) => return render_file_error(&session, &file_id, e.to_string()),
        },
        None => Vec::new(),
    };

    let header_row = values.first().cloned().unwrap_or_default();
    let width = header_row.len();
    let active_ref = active.as_deref();

    let tabs: Vec<_> = sheets
        .iter()
        .map(|sheet| {
            json!({
                "title": sheet.title,
                "active": Some(sheet.title.as_str()) == active_ref,
                "href": file_href(&file_id, Some(&sheet.title), None),
            })
        })
        .collect();

    let sheet_param = active_ref
        .map(|s| format!("?sheet={}", urlencoding::encode(s)))
        .unwrap_or_default();
    let encoded_id = urlencoding::encode(&file_id);

    let visible = filter_rows(&values, &query.search);
    let rows: Vec<_> = visible
        .into_iter()
        .map(|row| {
            json!({
                "index": row.index,
                "cells": pad_row(row.cells, width),
                "update_action": format!("/file/{}/rows/{}/update{}", encoded_id, row.index, sheet_param),
                "delete_action": format!("/file/{}/rows/{}/delete{}", encoded_id, row.index, sheet_param),
            })
        })
        .collect();

    let export = |format: &str| {
        active_ref.map(|s| {
            format!(
                "/file/{}/export?sheet={}&format={}",
                encoded_id,
                urlencoding::encode(s),
                format
            )
        })
    };

    render(
        "file",
        &json!({
            "title": active_ref.unwrap_or("Spreadsheet"),
            "user": session.display_name(),
            "notice": Notification::from_query(query.notice.as_deref(), query.kind),
            "token_error": session.token_error().map(|e| e.to_string()),
            "file_id": file_id,
            "sheets": tabs,
            "active_sheet": active_ref,
            "search": query.search,
            "header": header_row,
            "visible_count": rows.len(),
            "total_count": values.len().saturating_sub(1),
            "rows": rows,
            "refresh_href": file_href(&file_id, active_ref, None),
            "export_csv": export("csv"),
            "export_xlsx": export("xlsx"),
            "add_action": format!("/file/{}/patients{}", encoded_id, sheet_param),
        }),
    )
}

async fn add_patient(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(file_id): Path<String>,
    Query(query): Query<ReturnTo>,
    Form(form): Form<NewPatient>,
) -> Redirect {
    let notice = match patient::add_patient(&state.sheets, session.access_token(), &file_id, &form)
        .await
    {
        Ok(_) => Notification::success("Patient and related data added successfully"),
        Err(e) => {
            log::error!("Error adding patient data: {}", e);
            Notification::error(format!("Failed to add patient data: {}", e))
        }
    };

    Redirect::to(&file_href(&file_id, query.sheet.as_deref(), Some(&notice)))
}

async fn update_row(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path((file_id, index)): Path<(String, usize)>,
    Query(query): Query<SheetQuery>,
    Form(edit): Form<RowEdit>,
) -> Redirect {
    let notice = match state
        .sheets
        .update_sheet_row(
            session.access_token(),
            &file_id,
            &query.sheet,
            data_row_number(index),
            &edit.values,
        )
        .await
    {
        Ok(_) => Notification::success("Row updated successfully"),
        Err(e) => {
            log::error!("Error updating row: {}", e);
            Notification::error(format!("Failed to update: {}", e))
        }
    };

    Redirect::to(&file_href(&file_id, Some(&query.sheet), Some(&notice)))
}

async fn delete_row(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path((file_id, index)): Path<(String, usize)>,
    Query(query): Query<SheetQuery>,
) -> Redirect {
    let notice = match state
        .sheets
        .delete_sheet_row(
            session.access_token(),
            &file_id,
            &query.sheet,
            data_dimension_index(index),
        )
        .await
    {
        Ok(_) => Notification::success("Row deleted successfully"),
        Err(e) => {
            log::error!("Delete row error: {}", e);
            Notification::error(e.to_string())
        }
    };

    Redirect::to(&file_href(&file_id, Some(&query.sheet), Some(&notice)))
}

async fn export_sheet(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(file_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let token = session.access_token();

    let title = match query.sheet {
        Some(sheet) => sheet,
        None => match state.sheets.get_available_sheets(token, &file_id).await {
            Ok(sheets) => match pick_active_sheet(&sheets) {
                Some(title) => title.to_string(),
                None => return (StatusCode::NOT_FOUND, "Spreadsheet has no tabs").into_response(),
            },
            Err(e) => {
                let notice = Notification::error(e.to_string());
                return Redirect::to(&file_href(&file_id, None, Some(&notice))).into_response();
            }
        },
    };

    let rows = match state.sheets.fetch_sheet_data(token, &file_id, &title).await {
        Ok(rows) => rows,
        Err(e) => {
            let notice = Notification::error(e.to_string());
            return Redirect::to(&file_href(&file_id, Some(&title), Some(&notice))).into_response();
        }
    };

    match query.format.as_deref().unwrap_or("csv") {
        "csv" => attachment(
            "text/csv; charset=utf-8",
            &format!("{}.csv", title),
            downloader::to_csv(&rows).into_bytes(),
        ),
        "xlsx" => match downloader::to_xlsx(&title, &rows) {
            Ok(bytes) => attachment(XLSX_MIME, &format!("{}.xlsx", title), bytes),
            Err(e) => {
                log::error!("Failed to build workbook: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build workbook").into_response()
            }
        },
        other => (
            StatusCode::BAD_REQUEST,
            format!("Unsupported export format: {}", other),
        )
            .into_response(),
    }
}
