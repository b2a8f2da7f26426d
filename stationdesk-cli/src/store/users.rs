//! User accounts kept in `users.xlsx`
//!
//! Credentials are stored as supplied; checking them is the caller's job.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{OperationResult, format_bool, parse_bool, same_text};
use crate::excel::{Sheet, Workbook};

pub const USERS_SHEET: &str = "Users";
const USER_HEADER: &[&str] = &["name", "email", "password_hash", "admin", "created_at"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub created_at: String,
}

impl User {
    fn from_row(sheet: &Sheet, row: usize) -> Self {
        let value = |column: &str| {
            sheet
                .column_index(0, column)
                .map(|c| sheet.cell(row, c).trim().to_string())
                .unwrap_or_default()
        };
        User {
            name: value("name"),
            email: value("email"),
            password_hash: value("password_hash"),
            admin: parse_bool(&value("admin")),
            created_at: value("created_at"),
        }
    }

    fn write_row(&self, sheet: &mut Sheet, row: usize) {
        let cells = [
            ("name", self.name.as_str()),
            ("email", self.email.as_str()),
            ("password_hash", self.password_hash.as_str()),
            ("admin", format_bool(self.admin)),
            ("created_at", self.created_at.as_str()),
        ];
        for (column, value) in cells {
            let col = sheet.ensure_column(0, column);
            sheet.set_cell(row, col, value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        UserStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Workbook> {
        let mut workbook = Workbook::open_or_new(&self.path)?;
        let sheet = workbook.sheet_or_insert(USERS_SHEET);
        if sheet.used_rows() == 0 {
            *sheet = Sheet::with_header(USERS_SHEET, USER_HEADER);
        }
        Ok(workbook)
    }

    fn row_of(sheet: &Sheet, email: &str) -> Option<usize> {
        let col = sheet.column_index(0, "email")?;
        (1..sheet.rows.len()).find(|&row| same_text(sheet.cell(row, col), email))
    }

    pub fn list(&self) -> Result<Vec<User>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let workbook = Workbook::open(&self.path)?;
        let Some(sheet) = workbook.sheet(USERS_SHEET) else {
            return Ok(Vec::new());
        };
        Ok((1..sheet.rows.len())
            .filter(|&row| !sheet.row_is_empty(row))
            .map(|row| User::from_row(sheet, row))
            .collect())
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|u| same_text(&u.email, email)))
    }

    pub fn create(&self, user: &User) -> Result<OperationResult> {
        if user.email.trim().is_empty() {
            return Ok(OperationResult::failed("Email is required"));
        }
        let mut workbook = self.open()?;
        let sheet = workbook.require_sheet_mut(USERS_SHEET)?;
        if Self::row_of(sheet, &user.email).is_some() {
            return Ok(OperationResult::failed(format!(
                "User {} already exists",
                user.email
            )));
        }

        let mut user = user.clone();
        if user.created_at.trim().is_empty() {
            user.created_at = Utc::now().to_rfc3339();
        }
        let row = sheet.used_rows().max(1);
        user.write_row(sheet, row);
        workbook.save(&self.path)?;

        log::info!("Created user {}", user.email);
        Ok(OperationResult::ok(format!("Created user {}", user.email)))
    }

    /// Replace the user stored under `email`
    pub fn update(&self, email: &str, user: &User) -> Result<OperationResult> {
        let mut workbook = self.open()?;
        let sheet = workbook.require_sheet_mut(USERS_SHEET)?;
        let Some(row) = Self::row_of(sheet, email) else {
            return Ok(OperationResult::failed(format!("User {} not found", email)));
        };

        let mut user = user.clone();
        if user.created_at.trim().is_empty() {
            user.created_at = User::from_row(sheet, row).created_at;
        }
        user.write_row(sheet, row);
        workbook.save(&self.path)?;
        Ok(OperationResult::ok(format!("Updated user {}", email)))
    }

    pub fn delete(&self, email: &str) -> Result<OperationResult> {
        if !self.path.exists() {
            return Ok(OperationResult::failed(format!("User {} not found", email)));
        }
        let mut workbook = self.open()?;
        let sheet = workbook.require_sheet_mut(USERS_SHEET)?;
        let Some(row) = Self::row_of(sheet, email) else {
            return Ok(OperationResult::failed(format!("User {} not found", email)));
        };
        sheet.remove_row(row);
        workbook.save(&self.path)?;
        Ok(OperationResult::ok(format!("Deleted user {}", email)))
    }
}
