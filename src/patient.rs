//! The add-patient workflow
//!
//! A patient record is spread across four tabs of the clinic spreadsheet.
//! The column layouts below are positional conventions of that spreadsheet,
//! not a declared schema.

use chrono::{DateTime, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::sheets::{SheetRow, SheetsClient};

pub const PATIENT_TAB: &str = "patient";
pub const APPOINTMENT_TAB: &str = "appointment";
pub const PRESCRIBES_TAB: &str = "prescribes";
pub const PHYSICIAN_TAB: &str = "physician";

/// Placeholder the form carries until a patient id is generated
pub const AUTO_GENERATE: &str = "Auto Generate";

const PHYSICIAN_POSITION: &str = "Sr Doctor";

/// Fields of the add-patient form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPatient {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub location: String,
    pub age: String,
    pub phone: String,
    pub address: String,
    pub email: String,
    pub prescription: String,
    pub dose: String,
    pub visit_date: String,
    pub next_visit: String,
    pub physician_id: String,
    pub physician_name: String,
    pub physician_phone: String,
    pub bill: String,
}

impl Default for NewPatient {
    fn default() -> Self {
        Self {
            patient_id: AUTO_GENERATE.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            location: String::new(),
            age: String::new(),
            phone: String::new(),
            address: String::new(),
            email: String::new(),
            prescription: String::new(),
            dose: String::new(),
            visit_date: String::new(),
            next_visit: String::new(),
            physician_id: String::new(),
            physician_name: String::new(),
            physician_phone: String::new(),
            bill: String::new(),
        }
    }
}

/// Rows to append for one patient, one per tab
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRows {
    pub patient: SheetRow,
    pub appointment: SheetRow,
    pub prescribes: SheetRow,
    /// Only present when the form names a physician
    pub physician: Option<SheetRow>,
}

impl NewPatient {
    pub fn wants_generated_id(&self) -> bool {
        let id = self.patient_id.trim();
        id.is_empty() || id == AUTO_GENERATE
    }

    /// Lay the form out into per-tab rows
    pub fn to_rows(&self, patient_id: &str, appointment_id: &str) -> PatientRows {
        let patient = vec![
            patient_id.to_string(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.address.clone(),
            self.location.clone(),
            String::new(),
            self.phone.clone(),
            String::new(),
        ];

        let appointment = vec![
            appointment_id.to_string(),
            patient_id.to_string(),
            self.physician_id.clone(),
            format_date(&self.visit_date),
            format_date(&self.next_visit),
        ];

        let prescribes = vec![
            self.physician_id.clone(),
            patient_id.to_string(),
            self.prescription.clone(),
            self.dose.clone(),
        ];

        let physician = if !self.physician_id.trim().is_empty()
            && !self.physician_name.trim().is_empty()
        {
            let mut parts = self.physician_name.split_whitespace();
            let first = parts.next().unwrap_or_default();
            let last = parts.next().unwrap_or_default();
            Some(vec![
                self.physician_id.clone(),
                format!("{} {}", first, last).trim_end().to_string(),
                PHYSICIAN_POSITION.to_string(),
                self.physician_phone.clone(),
            ])
        } else {
            None
        };

        PatientRows {
            patient,
            appointment,
            prescribes,
            physician,
        }
    }
}

/// Generate an id of the form `<prefix>NNNN`
pub fn generate_id(prefix: &str) -> String {
    let n: u32 = rand::thread_rng().gen_range(0..10000);
    format!("{}{:04}", prefix, n)
}

fn generate_patient_id() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1000);
    format!("a12kj{:03}", n)
}

/// Format a date as `MM/DD/YY`
///
/// Accepts the `YYYY-MM-DD` value of an HTML date input or an RFC 3339
/// timestamp. Empty input stays empty; anything else unparseable is passed
/// through as typed.
pub fn format_date(date: &str) -> String {
    let date = date.trim();
    if date.is_empty() {
        return String::new();
    }

    if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        return d.format("%m/%d/%y").to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return dt.format("%m/%d/%y").to_string();
    }

    date.to_string()
}

/// Append a new patient and its related records
///
/// Appends to the patient, appointment and prescribes tabs, then to the
/// physician tab when a physician is named. Calls run in order and the first
/// failure stops the sequence; rows already appended stay in place.
///
/// # Arguments
/// * `sheets` - Client for the Sheets API
/// * `access_token` - The signed-in user's bearer token, if any
/// * `file_id` - Drive id of the clinic spreadsheet
/// * `form` - The submitted add-patient form
///
/// # Returns
/// * `Result<String, ApiError>` - The patient id used, or the first failure
pub async fn add_patient(
    sheets: &SheetsClient,
    access_token: Option<&str>,
    file_id: &str,
    form: &NewPatient,
) -> Result<String, ApiError> {
    let patient_id = if form.wants_generated_id() {
        generate_patient_id()
    } else {
        form.patient_id.trim().to_string()
    };
    let appointment_id = generate_id("ap");

    let rows = form.to_rows(&patient_id, &appointment_id);

    sheets
        .add_data_to_sheet(access_token, file_id, PATIENT_TAB, &rows.patient)
        .await?;
    sheets
        .add_data_to_sheet(access_token, file_id, APPOINTMENT_TAB, &rows.appointment)
        .await?;
    sheets
        .add_data_to_sheet(access_token, file_id, PRESCRIBES_TAB, &rows.prescribes)
        .await?;
    if let Some(physician) = &rows.physician {
        sheets
            .add_data_to_sheet(access_token, file_id, PHYSICIAN_TAB, physician)
            .await?;
    }

    log::info!("Added patient {} with appointment {}", patient_id, appointment_id);
    Ok(patient_id)
}
