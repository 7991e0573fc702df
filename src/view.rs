//! Page state helpers shared by the file and drive pages

use serde::{Deserialize, Serialize};

use crate::patient::PATIENT_TAB;
use crate::sheets::{SheetDescriptor, SheetRow};

/// Pick the tab a file page opens on: `patient` if present, else the first
pub fn pick_active_sheet(sheets: &[SheetDescriptor]) -> Option<&str> {
    sheets
        .iter()
        .find(|sheet| sheet.title.eq_ignore_ascii_case(PATIENT_TAB))
        .or_else(|| sheets.first())
        .map(|sheet| sheet.title.as_str())
}

/// A data row that survived the search filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleRow {
    /// 0-based position among data rows (header excluded)
    pub index: usize,
    pub cells: SheetRow,
}

impl VisibleRow {
    /// A1 row number of this row, for value updates
    pub fn sheet_row_number(&self) -> usize {
        data_row_number(self.index)
    }
}

/// A1 row number of the data row at `index` (row 1 is the header)
pub fn data_row_number(index: usize) -> usize {
    index + 2
}

/// 0-based dimension index of the data row at `index`, for row deletion
pub fn data_dimension_index(index: usize) -> usize {
    index + 1
}

/// Drop the header and keep rows with any cell containing `search`
pub fn filter_rows(values: &[SheetRow], search: &str) -> Vec<VisibleRow> {
    if values.len() <= 1 {
        return Vec::new();
    }
    let needle = search.trim().to_lowercase();

    values[1..]
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            needle.is_empty() || row.iter().any(|cell| cell.to_lowercase().contains(&needle))
        })
        .map(|(index, row)| VisibleRow {
            index,
            cells: row.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    #[default]
    Success,
    Error,
    Info,
    Warning,
}

/// A dismissible message carried across a redirect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }

    /// Query-string form appended to a redirect target
    pub fn to_query(&self) -> String {
        let kind = match self.kind {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
            NoticeKind::Info => "info",
            NoticeKind::Warning => "warning",
        };
        format!("notice={}&kind={}", urlencoding::encode(&self.message), kind)
    }

    /// Rebuild from the `notice` / `kind` query parameters
    pub fn from_query(notice: Option<&str>, kind: Option<NoticeKind>) -> Option<Self> {
        notice.filter(|n| !n.is_empty()).map(|message| Self {
            kind: kind.unwrap_or_default(),
            message: message.to_string(),
        })
    }
}
