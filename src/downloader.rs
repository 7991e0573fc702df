#![cfg(not(tarpaulin_include))]

use crate::sheets::SheetRow;
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};

/// Longest worksheet name Excel accepts
const MAX_WORKSHEET_NAME: usize = 31;

/// Convert the rows of a tab to CSV
///
/// Rows are written as fetched, header first. Cells containing commas,
/// quotes or line breaks are quoted, with embedded quotes doubled.
///
/// # Arguments
/// * `rows` - The tab's rows, header included
///
/// # Returns
/// * `String` - The CSV document, one line per row
///
/// # Examples
/// ```
/// use medsheets::downloader::to_csv;
///
/// let rows = vec![vec!["name".to_string(), "dose".to_string()],
///                 vec!["Ibuprofen".to_string(), "200mg, twice".to_string()]];
/// assert_eq!(to_csv(&rows), "name,dose\nIbuprofen,\"200mg, twice\"\n");
/// ```
pub fn to_csv(rows: &[SheetRow]) -> String {
    let mut csv_content = String::new();

    for row in rows {
        for (c, value) in row.iter().enumerate() {
            if c > 0 {
                csv_content.push(',');
            }

            if value.contains([',', '"', '\n', '\r']) {
                let escaped = value.replace('"', "\"\"");
                csv_content.push_str(&format!("\"{}\"", escaped));
            } else {
                csv_content.push_str(value);
            }
        }
        csv_content.push('\n');
    }

    csv_content
}

/// Turn a tab title into a name Excel accepts for a worksheet
///
/// Characters Excel forbids (`[ ] : * ? / \`) become `_`, leading and
/// trailing apostrophes are dropped and the result is cut to 31 characters.
/// An empty result falls back to `Sheet1`.
pub fn worksheet_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .collect();

    let name: String = cleaned
        .trim_matches('\'')
        .chars()
        .take(MAX_WORKSHEET_NAME)
        .collect();
    let name = name.trim_end_matches('\'');

    if name.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        name.to_string()
    }
}

/// Convert the rows of a tab to an XLSX workbook
///
/// Produces a single worksheet with every cell written as a string. The
/// worksheet is named after the tab, adjusted by [`worksheet_name`].
///
/// # Arguments
/// * `title` - The tab title
/// * `rows` - The tab's rows, header included
///
/// # Returns
/// * `Result<Vec<u8>, XlsxError>` - The workbook bytes or a writer error
pub fn to_xlsx(title: &str, rows: &[SheetRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(worksheet_name(title))?;

    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            worksheet.write_string(r as u32, c as u16, value)?;
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer()
}
