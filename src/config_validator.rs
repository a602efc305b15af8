//! Configuration Validation
//!
//! HARDENING: Validates all configuration at startup.
//! Collects every invalid field before failing, with explicit messages.

use std::path::Path;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid configuration for '{}': {} (value: {})",
            self.field, self.message, self.value
        )
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of config validation
pub type ConfigResult<T> = Result<T, Vec<ConfigValidationError>>;

/// Configuration validator
pub struct ConfigValidator {
    errors: Vec<ConfigValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add an error
    fn error(&mut self, field: &str, value: impl std::fmt::Display, message: &str) {
        self.errors.push(ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Validate non-empty string
    pub fn validate_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, value, "Value cannot be empty");
        }
        self
    }

    /// Validate path is directory (a missing path passes)
    pub fn validate_is_directory(&mut self, field: &str, path: &Path) -> &mut Self {
        if path.exists() && !path.is_dir() {
            self.error(field, path.display(), "Path is not a directory");
        }
        self
    }

    /// Validate that a database file's parent directory exists
    pub fn validate_parent_exists(&mut self, field: &str, path: &Path) -> &mut Self {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                self.error(field, path.display(), "Parent directory does not exist");
            }
            _ => {}
        }
        self
    }

    /// Validate SQL identifier: letters, digits, underscores, not starting with a digit
    pub fn validate_identifier(&mut self, field: &str, value: &str) -> &mut Self {
        let valid = value
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            self.error(
                field,
                value,
                "Must contain only letters, digits and underscores, and not start with a digit",
            );
        }
        self
    }

    /// Validate value is one of a fixed set (case-insensitive)
    pub fn validate_one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
            self.error(
                field,
                value,
                &format!("Value must be one of: {}", allowed.join(", ")),
            );
        }
        self
    }

    /// Finish validation and return result
    pub fn finish(self) -> ConfigResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Check if any errors occurred
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get current errors
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format validation errors for display
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identifier_validation() {
        let mut v = ConfigValidator::new();
        v.validate_identifier("version_table", "aeromigrate_version");
        assert!(v.finish().is_ok());

        for bad in ["", "1abc", "has space", "semi;colon", "quo\"te"] {
            let mut v = ConfigValidator::new();
            v.validate_identifier("version_table", bad);
            assert!(v.has_errors(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_one_of() {
        let mut v = ConfigValidator::new();
        v.validate_one_of("logging.format", "JSON", &["text", "json"]);
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_one_of("logging.format", "xml", &["text", "json"]);
        let err = v.finish().unwrap_err();
        assert!(err[0].message.contains("text, json"));
    }

    #[test]
    fn test_paths() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let mut v = ConfigValidator::new();
        v.validate_is_directory("revisions_dir", temp_dir.path())
            .validate_is_directory("revisions_dir", &temp_dir.path().join("missing"))
            .validate_parent_exists("database", &temp_dir.path().join("app.db"))
            .validate_parent_exists("database", Path::new("app.db"));
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_is_directory("revisions_dir", &file)
            .validate_parent_exists("database", &temp_dir.path().join("nope/app.db"));
        assert_eq!(v.finish().unwrap_err().len(), 2);
    }

    #[test]
    fn test_multiple_errors() {
        let mut v = ConfigValidator::new();
        v.validate_non_empty("database", "")
            .validate_identifier("version_table", "1x")
            .validate_one_of("logging.level", "loud", &["info"]);

        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(format_validation_errors(&errors).contains("'database'"));
    }
}
