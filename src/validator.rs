// src/validator.rs - Centralized validation module
use std::collections::HashMap;
use serde::Serialize;
use regex::Regex;
use lazy_static::lazy_static;
use crate::error::ApiError;

lazy_static! {
    static ref BATCH_NO_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_/.\-]*$").unwrap();
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
}

pub const BATCH_NO_MAX_LENGTH: usize = 50;

// ==================== VALIDATION RESULT ====================

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::FieldErrors(self.errors.clone())
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ApiError::FieldErrors(self.errors))
        }
    }
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            Err(format!("{} cannot be empty", field))
        } else {
            Ok(())
        }
    }

    pub fn length(value: &str, field: &str, min: Option<usize>, max: Option<usize>) -> Result<(), String> {
        let len = value.chars().count();

        if let Some(min_len) = min {
            if len < min_len {
                return Err(format!("{} must be at least {} characters", field, min_len));
            }
        }

        if let Some(max_len) = max {
            if len > max_len {
                return Err(format!("{} must not exceed {} characters", field, max_len));
            }
        }

        Ok(())
    }

    pub fn batch_no(value: &str) -> Result<(), String> {
        let value = value.trim();
        Self::not_empty(value, "Batch number")?;
        Self::length(value, "Batch number", None, Some(BATCH_NO_MAX_LENGTH))?;

        if !BATCH_NO_REGEX.is_match(value) {
            return Err(
                "Batch number must start with a letter or digit and contain only letters, digits, '-', '_', '/' or '.'"
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn username(value: &str) -> Result<(), String> {
        Self::length(value, "Username", Some(3), Some(50))?;
        if !USERNAME_REGEX.is_match(value) {
            return Err("Username may contain only letters, digits, '.', '_' or '-'".to_string());
        }
        Ok(())
    }
}
