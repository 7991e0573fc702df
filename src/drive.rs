//! Thin wrapper over the Drive v3 file endpoints
//!
//! Each operation is a single bearer-authenticated request. A missing token
//! fails locally; a non-success status becomes an [`ApiError::Status`].

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::Endpoints;
use crate::error::{ApiError, bearer, token_hint};

/// MIME type Drive reports for native Google spreadsheets
pub const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// MIME type of an Excel workbook, the export format for native spreadsheets
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// A file entry as returned by the Drive list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl DriveFile {
    pub fn is_spreadsheet(&self) -> bool {
        self.mime_type == SPREADSHEET_MIME
    }
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    base: String,
    upload_base: String,
}

impl DriveClient {
    pub fn new(http: Client, endpoints: &Endpoints) -> Self {
        Self {
            http,
            base: endpoints.drive.trim_end_matches('/').to_string(),
            upload_base: endpoints.drive_upload.trim_end_matches('/').to_string(),
        }
    }

    /// List the user's spreadsheets
    ///
    /// Asks Drive for the first page of non-trashed files and keeps only the
    /// ones typed as Google spreadsheets.
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token, if any
    ///
    /// # Returns
    /// * `Result<Vec<DriveFile>, ApiError>` - Spreadsheets only, or the failure
    pub async fn list_files(&self, access_token: Option<&str>) -> Result<Vec<DriveFile>, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Listing Drive files with token {}", token_hint(token));

        let response = self
            .http
            .get(format!("{}/files", self.base))
            .bearer_auth(token)
            .query(&[
                ("pageSize", "10"),
                ("fields", "files(id,name,mimeType,webViewLink)"),
                ("q", "trashed=false"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!("Drive list error response: {}", response.text().await.unwrap_or_default());
            return Err(ApiError::status("Failed to list files", status));
        }

        let list: FileList = response.json().await?;
        log::debug!("Files retrieved: {}", list.files.len());

        Ok(list.files.into_iter().filter(DriveFile::is_spreadsheet).collect())
    }

    /// Upload a file with a multipart metadata + media request
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token
    /// * `name` - File name to create in Drive
    /// * `mime_type` - Content type of `bytes`
    /// * `bytes` - The file content
    ///
    /// # Returns
    /// * `Result<DriveFile, ApiError>` - The created file entry or the failure
    pub async fn upload_file(
        &self,
        access_token: Option<&str>,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<DriveFile, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Uploading {} ({} bytes) to Drive", name, bytes.len());

        let metadata = serde_json::json!({ "name": name }).to_string();
        let form = Form::new()
            .part("metadata", Part::text(metadata).mime_str("application/json")?)
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(name.to_string())
                    .mime_str(mime_type)?,
            );

        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart")])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Drive upload error response: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("File upload failed", status));
        }

        Ok(response.json().await?)
    }

    /// Fetch the raw content of a file
    ///
    /// Only works for files with binary content. Native Google files are
    /// refused by Drive; use [`DriveClient::export_file`] for those.
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token
    /// * `file_id` - Drive id of the file
    ///
    /// # Returns
    /// * `Result<Vec<u8>, ApiError>` - The file bytes or the failure
    pub async fn download_file(
        &self,
        access_token: Option<&str>,
        file_id: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Downloading Drive file {}", file_id);

        let response = self
            .http
            .get(format!("{}/files/{}", self.base, urlencoding::encode(file_id)))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Drive download error response: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("File download failed", status));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Convert a native Google file and fetch the result
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token
    /// * `file_id` - Drive id of the file
    /// * `mime_type` - Target format, e.g. [`XLSX_MIME`] for spreadsheets
    ///
    /// # Returns
    /// * `Result<Vec<u8>, ApiError>` - The converted bytes or the failure
    pub async fn export_file(
        &self,
        access_token: Option<&str>,
        file_id: &str,
        mime_type: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Exporting Drive file {} as {}", file_id, mime_type);

        let response = self
            .http
            .get(format!(
                "{}/files/{}/export",
                self.base,
                urlencoding::encode(file_id)
            ))
            .bearer_auth(token)
            .query(&[("mimeType", mime_type)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Drive export error response: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("File export failed", status));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Delete a file permanently
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token
    /// * `file_id` - Drive id of the file
    ///
    /// # Errors
    /// * `ApiError::MissingToken` when no token is available
    /// * `ApiError::Status` when Drive refuses the deletion
    pub async fn delete_file(&self, access_token: Option<&str>, file_id: &str) -> Result<(), ApiError> {
        let token = bearer(access_token)?;
        log::info!("Deleting Drive file {}", file_id);

        let response = self
            .http
            .delete(format!("{}/files/{}", self.base, urlencoding::encode(file_id)))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Drive delete error response: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("File deletion failed", status));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> DriveClient {
        DriveClient::new(Client::new(), &Endpoints::all_at(&server.uri()))
    }

    #[tokio::test]
    async fn list_keeps_only_spreadsheets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "trashed=false"))
            .and(query_param("pageSize", "10"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    { "id": "1", "name": "Clinic", "mimeType": SPREADSHEET_MIME, "webViewLink": "https://docs/1" },
                    { "id": "2", "name": "scan.pdf", "mimeType": "application/pdf" },
                    { "id": "3", "name": "Notes", "mimeType": "application/vnd.google-apps.document" },
                    { "id": "4", "name": "Billing", "mimeType": SPREADSHEET_MIME }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let files = client_for(&server).await.list_files(Some("tok")).await.unwrap();

        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(files[0].web_view_link.as_deref(), Some("https://docs/1"));
        assert_eq!(files[1].web_view_link, None);
    }

    #[tokio::test]
    async fn list_reports_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).await.list_files(Some("stale")).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to list files: 401 Unauthorized");
    }

    #[tokio::test]
    async fn missing_token_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        assert!(matches!(client.list_files(None).await, Err(ApiError::MissingToken)));
        assert!(matches!(
            client.upload_file(None, "a.csv", "text/csv", b"x".to_vec()).await,
            Err(ApiError::MissingToken)
        ));
        assert!(matches!(client.download_file(Some(""), "1").await, Err(ApiError::MissingToken)));
        assert!(matches!(client.delete_file(None, "1").await, Err(ApiError::MissingToken)));
        assert!(matches!(
            client.export_file(None, "1", XLSX_MIME).await,
            Err(ApiError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn export_converts_native_spreadsheets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/sheet-1/export"))
            .and(query_param("mimeType", XLSX_MIME))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = client_for(&server)
            .await
            .export_file(Some("tok"), "sheet-1", XLSX_MIME)
            .await
            .unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn export_reports_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/sheet-1/export"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .export_file(Some("tok"), "sheet-1", XLSX_MIME)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File export failed: 403 Forbidden");
    }

    #[tokio::test]
    async fn upload_posts_multipart_and_returns_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(query_param("uploadType", "multipart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "new", "name": "visits.csv", "mimeType": "text/csv"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = client_for(&server)
            .await
            .upload_file(Some("tok"), "visits.csv", "text/csv", b"a,b\n".to_vec())
            .await
            .unwrap();

        assert_eq!(file.id, "new");
        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains(r#"{"name":"visits.csv"}"#));
        assert!(body.contains("a,b"));
    }

    #[tokio::test]
    async fn download_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/abc"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"content".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/abc"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.download_file(Some("tok"), "abc").await.unwrap(), b"content");
        client.delete_file(Some("tok"), "abc").await.unwrap();

        let err = client.delete_file(Some("tok"), "gone").await.unwrap_err();
        assert_eq!(err.to_string(), "File deletion failed: 404 Not Found");
    }
}
