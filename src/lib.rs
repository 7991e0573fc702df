/*!
# MedSheets

A browser-based dashboard for clinic records kept in Google Sheets.

## Overview

Users sign in with their Google account, browse the spreadsheets in their
Google Drive, open one, and work on its tabs (patient, appointment,
prescribes, physician): search rows, add a patient across all four tabs, edit
a row in place, delete a row, or export a tab.

There is no local database. Every page view fetches fresh data from Google and
every change is written straight back through the REST APIs.

## Architecture

### Remote API layer
- **drive**: list / upload / download / delete on Drive v3
- **sheets**: metadata, value reads, appends, updates and row deletion on Sheets v4
- **patient**: the add-patient workflow spanning four tabs

### Web layer (`web` feature)
- **login**: Google OAuth sign-in, in-memory sessions, authentication middleware
- **app**: routing and request handlers
- **pages**: Handlebars page templates
- **downloader**: CSV / XLSX export of a tab

## Routes

- `/` - Landing page
- `/auth/signin`, `/auth/google`, `/auth/signout` - Sign-in flow
- `/drive` - Spreadsheets in the user's Drive (sign-in required)
- `/file/{id}` - Tabs and rows of one spreadsheet (sign-in required)
*/

pub mod config;
pub mod drive;
pub mod error;
pub mod patient;
pub mod sheets;
pub mod view;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod downloader;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod pages;

pub use config::{Config, Endpoints};
pub use error::ApiError;
