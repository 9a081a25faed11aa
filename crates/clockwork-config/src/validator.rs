//! Configuration validation.

use crate::schema::{Config, PersistenceKind};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    pub fn add_warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }
}

/// A single validation finding.
#[derive(Debug)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.server.port == 0 {
            result.add_error(ValidationIssue::new("server.port", "port cannot be 0"));
        }
        if config.server.host.is_empty() {
            result.add_error(ValidationIssue::new("server.host", "host cannot be empty"));
        }

        match config.persistence.kind {
            PersistenceKind::Postgres if config.persistence.url.is_empty() => {
                result.add_error(ValidationIssue::new(
                    "persistence.url",
                    "postgres driver requires a connection url",
                ));
            }
            PersistenceKind::File if config.persistence.path.as_os_str().is_empty() => {
                result.add_error(ValidationIssue::new(
                    "persistence.path",
                    "file driver requires a storage path",
                ));
            }
            PersistenceKind::Memory => {
                result.add_warning(ValidationIssue::new(
                    "persistence.kind",
                    "memory driver loses all jobs on restart",
                ));
            }
            _ => {}
        }

        if let Some(token) = &config.auth.token {
            if token.is_empty() {
                result.add_error(ValidationIssue::new(
                    "auth.token",
                    "token must be non-empty when set",
                ));
            }
        }

        result
    }
}
