//! Sheets v4 wrapper: metadata, value reads, appends, updates and row deletion

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Endpoints;
use crate::error::{ApiError, bearer};

/// Ordered cell values of one sheet row; column meaning is positional
pub type SheetRow = Vec<String>;

/// A tab inside a spreadsheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetDescriptor {
    pub id: i64,
    pub title: String,
}

#[derive(Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: i64,
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SheetsClient {
    http: Client,
    base: String,
}

impl SheetsClient {
    pub fn new(http: Client, endpoints: &Endpoints) -> Self {
        Self {
            http,
            base: endpoints.sheets.trim_end_matches('/').to_string(),
        }
    }

    fn spreadsheet_url(&self, file_id: &str) -> String {
        format!("{}/spreadsheets/{}", self.base, urlencoding::encode(file_id))
    }

    fn values_url(&self, file_id: &str, range: &str) -> String {
        format!("{}/values/{}", self.spreadsheet_url(file_id), range)
    }

    async fn metadata(&self, token: &str, file_id: &str) -> Result<Vec<SheetDescriptor>, ApiError> {
        let response = self
            .http
            .get(self.spreadsheet_url(file_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::status(
                "Failed to get spreadsheet metadata",
                response.status(),
            ));
        }

        let metadata: SpreadsheetMetadata = response.json().await?;
        Ok(metadata
            .sheets
            .into_iter()
            .map(|sheet| SheetDescriptor {
                id: sheet.properties.sheet_id,
                title: sheet.properties.title,
            })
            .collect())
    }

    /// List the tabs of a spreadsheet
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token, if any
    /// * `file_id` - Drive id of the spreadsheet
    ///
    /// # Returns
    /// * `Result<Vec<SheetDescriptor>, ApiError>` - Tab ids and titles in order
    pub async fn get_available_sheets(
        &self,
        access_token: Option<&str>,
        file_id: &str,
    ) -> Result<Vec<SheetDescriptor>, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Fetching sheet metadata for {}", file_id);

        self.metadata(token, file_id).await.inspect_err(|e| {
            log::error!("Error fetching Google Sheets metadata: {}", e);
        })
    }

    /// Read every populated row of a tab, header included
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token, if any
    /// * `file_id` - Drive id of the spreadsheet
    /// * `sheet_title` - Title of the tab to read
    ///
    /// # Returns
    /// * `Result<Vec<SheetRow>, ApiError>` - Rows as text, empty for an empty tab
    pub async fn fetch_sheet_data(
        &self,
        access_token: Option<&str>,
        file_id: &str,
        sheet_title: &str,
    ) -> Result<Vec<SheetRow>, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Fetching values of '{}' in {}", sheet_title, file_id);

        let response = self
            .http
            .get(self.values_url(file_id, &urlencoding::encode(sheet_title)))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = ApiError::status("Failed to get sheet data", response.status());
            log::error!("Error fetching Google Sheet data: {}", err);
            return Err(err);
        }

        let range: ValueRange = response.json().await?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Append one row after the last populated row of a tab
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token, if any
    /// * `file_id` - Drive id of the spreadsheet
    /// * `sheet_name` - Title of the tab to append to
    /// * `row` - Cell values, entered as if typed by the user
    ///
    /// # Errors
    /// * `ApiError::Status` naming the tab when Sheets refuses the append
    pub async fn add_data_to_sheet(
        &self,
        access_token: Option<&str>,
        file_id: &str,
        sheet_name: &str,
        row: &[String],
    ) -> Result<Value, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Appending row to '{}' in {}", sheet_name, file_id);

        let url = format!(
            "{}:append",
            self.values_url(file_id, &urlencoding::encode(sheet_name))
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [row] }))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = ApiError::status(
                format!("Failed to add data to {} sheet", sheet_name),
                response.status(),
            );
            log::error!("Error adding data to {} sheet: {}", sheet_name, err);
            return Err(err);
        }

        Ok(response.json().await?)
    }

    /// Overwrite a row in place
    ///
    /// `row_number` is the 1-based A1 row, so the first data row under the
    /// header is 2.
    ///
    /// # Arguments
    /// * `access_token` - The signed-in user's bearer token, if any
    /// * `file_id` - Drive id of the spreadsheet
    /// * `sheet_title` - Title of the tab holding the row
    /// * `row_number` - 1-based A1 row number
    /// * `row` - New cell values, starting at column A
    pub async fn update_sheet_row(
        &self,
        access_token: Option<&str>,
        file_id: &str,
        sheet_title: &str,
        row_number: usize,
        row: &[String],
    ) -> Result<Value, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Updating row {} of '{}' in {}", row_number, sheet_title, file_id);

        let range = row_range(sheet_title, row_number);
        let response = self
            .http
            .put(self.values_url(file_id, &range))
            .bearer_auth(token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [row] }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Sheets API error: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("Failed to update row", status));
        }

        Ok(response.json().await?)
    }

    /// Delete one row from a tab
    ///
    /// Resolves the tab title to its numeric id with a metadata call, then
    /// issues a `deleteDimension` batch update. The two calls are independent:
    /// nothing is undone if the second one fails. `row_index` is 0-based with
    /// the header at 0.
    ///
    /// # Errors
    /// * `ApiError::SheetNotFound` when no tab has `sheet_title`; no delete is sent
    /// * `ApiError::Status` when either call is refused
    pub async fn delete_sheet_row(
        &self,
        access_token: Option<&str>,
        file_id: &str,
        sheet_title: &str,
        row_index: usize,
    ) -> Result<Value, ApiError> {
        let token = bearer(access_token)?;
        log::info!("Deleting row {} of '{}' in {}", row_index, sheet_title, file_id);

        let sheet_id = self
            .metadata(token, file_id)
            .await?
            .into_iter()
            .find(|sheet| sheet.title == sheet_title)
            .map(|sheet| sheet.id)
            .ok_or_else(|| ApiError::SheetNotFound(sheet_title.to_string()))?;

        let request = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_index,
                        "endIndex": row_index + 1
                    }
                }
            }]
        });

        let response = self
            .http
            .post(format!("{}:batchUpdate", self.spreadsheet_url(file_id)))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            log::error!(
                "Google Sheets API error: {}",
                response.text().await.unwrap_or_default()
            );
            return Err(ApiError::status("Failed to delete row", status));
        }

        Ok(response.json().await?)
    }
}

/// Percent-encoded A1 range for the first cell of one row
///
/// The title is single-quoted with embedded quotes doubled, so titles such as
/// `A1` or `Visits!` stay unambiguous.
fn row_range(sheet_title: &str, row_number: usize) -> String {
    let quoted = format!("'{}'", sheet_title.replace('\'', "''"));
    format!("{}!A{}", urlencoding::encode(&quoted), row_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata_body() -> Value {
        json!({
            "spreadsheetId": "f1",
            "sheets": [
                { "properties": { "sheetId": 0, "title": "patient" } },
                { "properties": { "sheetId": 918273, "title": "appointment" } }
            ]
        })
    }

    async fn client_for(server: &MockServer) -> SheetsClient {
        SheetsClient::new(Client::new(), &Endpoints::all_at(&server.uri()))
    }

    #[tokio::test]
    async fn lists_tab_descriptors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
            .mount(&server)
            .await;

        let sheets = client_for(&server)
            .await
            .get_available_sheets(Some("tok"), "f1")
            .await
            .unwrap();

        assert_eq!(
            sheets,
            vec![
                SheetDescriptor { id: 0, title: "patient".into() },
                SheetDescriptor { id: 918273, title: "appointment".into() },
            ]
        );
    }

    #[tokio::test]
    async fn metadata_failure_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_available_sheets(Some("tok"), "nope")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to get spreadsheet metadata: 404 Not Found");
    }

    #[tokio::test]
    async fn values_are_stringified_and_absent_values_are_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1/values/patient"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "patient!A1:C2",
                "values": [["ssn", "first_name", "age"], ["a12kj001", "Ada", 36]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1/values/physician"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "physician!A1:Z1000"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let rows = client.fetch_sheet_data(Some("tok"), "f1", "patient").await.unwrap();
        assert_eq!(rows[1], vec!["a12kj001", "Ada", "36"]);

        let empty = client.fetch_sheet_data(Some("tok"), "f1", "physician").await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn append_posts_single_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/spreadsheets/f1/values/prescribes:append"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(body_json(json!({ "values": [["ph1", "p1", "Ibuprofen", "200mg"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updates": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let row: Vec<String> = ["ph1", "p1", "Ibuprofen", "200mg"].map(String::from).to_vec();
        client_for(&server)
            .await
            .add_data_to_sheet(Some("tok"), "f1", "prescribes", &row)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_targets_a1_row() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/spreadsheets/f1/values/%27patient%27!A3"))
            .and(body_json(json!({ "values": [["p2", "Grace"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let row = vec!["p2".to_string(), "Grace".to_string()];
        client_for(&server)
            .await
            .update_sheet_row(Some("tok"), "f1", "patient", 3, &row)
            .await
            .unwrap();
    }

    #[test]
    fn row_range_quotes_the_title() {
        assert_eq!(row_range("patient", 3), "%27patient%27!A3");
        assert_eq!(row_range("A1", 2), "%27A1%27!A2");
        assert_eq!(row_range("Dr O'Neil", 5), "%27Dr%20O%27%27Neil%27!A5");
    }

    #[tokio::test]
    async fn update_quotes_reference_like_titles() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/spreadsheets/f1/values/%27B2%27!A4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let row = vec!["x".to_string()];
        client_for(&server)
            .await
            .update_sheet_row(Some("tok"), "f1", "B2", 4, &row)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn append_failure_names_the_tab() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/spreadsheets/f1/values/physician:append"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let row = vec!["ph1".to_string()];
        let err = client_for(&server)
            .await
            .add_data_to_sheet(Some("tok"), "f1", "physician", &row)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to add data to physician sheet: 403 Forbidden");
    }

    #[tokio::test]
    async fn delete_resolves_title_before_batch_update() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/spreadsheets/f1:batchUpdate"))
            .and(body_json(json!({
                "requests": [{ "deleteDimension": { "range": {
                    "sheetId": 918273, "dimension": "ROWS", "startIndex": 4, "endIndex": 5
                } } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "replies": [{}] })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .delete_sheet_row(Some("tok"), "f1", "appointment", 4)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].method.as_str(), "GET");
        assert_eq!(requests[1].method.as_str(), "POST");
    }

    #[tokio::test]
    async fn delete_accepts_first_tab_with_id_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/spreadsheets/f1:batchUpdate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .await
            .delete_sheet_row(Some("tok"), "f1", "patient", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_aborts_when_title_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/f1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/spreadsheets/f1:batchUpdate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .delete_sheet_row(Some("tok"), "f1", "billing", 1)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not find sheet with title: billing");
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
        let row = vec!["x".to_string()];

        assert!(matches!(client.get_available_sheets(None, "f1").await, Err(ApiError::MissingToken)));
        assert!(matches!(client.fetch_sheet_data(None, "f1", "patient").await, Err(ApiError::MissingToken)));
        assert!(matches!(client.add_data_to_sheet(None, "f1", "patient", &row).await, Err(ApiError::MissingToken)));
        assert!(matches!(client.update_sheet_row(Some(""), "f1", "patient", 2, &row).await, Err(ApiError::MissingToken)));
        assert!(matches!(client.delete_sheet_row(None, "f1", "patient", 1).await, Err(ApiError::MissingToken)));
    }
}
