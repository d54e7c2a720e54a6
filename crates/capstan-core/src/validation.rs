//! Field-level validation for stages.
//!
//! Validation failures are collected rather than raised one at a time, so a
//! caller can report every bad field in a single pass.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Maximum length of a stage name.
pub const MAX_STAGE_NAME_LENGTH: usize = 250;

// local-part@host.tld, local-part excludes `@ , < > ? & ; :` and whitespace
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([^@\s,<>?&;:]+)@((?:[-a-z0-9]+\.)+[a-z]{2,})$").unwrap()
});

/// A single failed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// All field errors found on one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Errors reported against `field`.
    pub fn on(&self, field: &str) -> Vec<&FieldError> {
        self.0.iter().filter(|e| e.field == field).collect()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join(", "))
    }
}

/// Check a single address against the alert email grammar.
pub fn is_valid_email(address: &str) -> bool {
    EMAIL_REGEX.is_match(address)
}

/// Validate a stage name: present, and at most [`MAX_STAGE_NAME_LENGTH`] characters.
pub fn validate_stage_name(name: &str, errors: &mut ValidationErrors) {
    if name.trim().is_empty() {
        errors.add("name", "can't be blank");
    } else if name.chars().count() > MAX_STAGE_NAME_LENGTH {
        errors.add(
            "name",
            format!("is too long (maximum is {} characters)", MAX_STAGE_NAME_LENGTH),
        );
    }
}

/// Validate a space-separated list of alert addresses. Blank is accepted.
///
/// Only one error is reported no matter how many addresses are malformed.
pub fn validate_alert_emails(alert_emails: Option<&str>, errors: &mut ValidationErrors) {
    let Some(alert_emails) = alert_emails else {
        return;
    };

    if alert_emails
        .split_whitespace()
        .any(|address| !is_valid_email(address))
    {
        errors.add(
            "alert_emails",
            "format is not valid, please separate email addresses by space",
        );
    }
}

/// Interpret a stored lock flag. Only `0` and `1` are meaningful.
pub fn parse_locked_flag(value: i64) -> Result<bool, FieldError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(FieldError::new(
            "locked",
            format!("is not included in the list (got {})", other),
        )),
    }
}
