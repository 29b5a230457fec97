//! Core error types for Maintflow RS
//!
//! Every fallible operation in the order engine surfaces one of these kinds;
//! nothing is silently swallowed except notification delivery (see mf-orders).

use std::collections::HashMap;
use thiserror::Error;

/// Core error type for all Maintflow operations
#[derive(Error, Debug)]
pub enum MfError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// A concurrent mutation won the race; the caller may retry with a
    /// reloaded aggregate.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// A collaborator (directory, stock ledger, catalog) refused the operation.
    #[error("Dependency error: {service} - {message}")]
    Dependency { service: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MfError {
    pub fn not_found(entity: &'static str, field: &'static str, value: impl ToString) -> Self {
        Self::NotFound {
            entity,
            field,
            value: value.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn dependency(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dependency {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Only conflicts are safe to retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict { .. } => "conflict",
            Self::Dependency { .. } => "dependency_error",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
            Self::Config(_) => "configuration_error",
        }
    }
}

/// Validation errors collection keyed by field
#[derive(Error, Debug, Default, Clone)]
#[error("Validation errors: {errors:?}")]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: HashMap<String, Vec<String>>,
    /// Base errors not tied to a specific field
    pub base_errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.base_errors.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.base_errors.is_empty()
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Vec<String>> {
        self.errors.get(field)
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
        self.base_errors.extend(other.base_errors);
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = self.base_errors.clone();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{} {}", field, msg));
            }
        }
        messages
    }

    /// Build a single-field error in one call.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Convert into an `MfError` if anything was collected.
    pub fn into_result(self) -> Result<(), MfError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MfError::Validation(self))
        }
    }
}

impl From<validator::ValidationErrors> for ValidationErrors {
    fn from(errs: validator::ValidationErrors) -> Self {
        let mut out = ValidationErrors::new();
        for (field, field_errors) in errs.field_errors() {
            for err in field_errors {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("is invalid ({})", err.code));
                out.add(field.to_string(), message);
            }
        }
        out
    }
}
