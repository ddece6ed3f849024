//! Configuration and validation errors raised before any network call.

use thiserror::Error;

/// A missing or malformed setting, preset field, or credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value that cannot be used.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A referenced document does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Document kind (preset, credentials, schedule).
        kind: String,
        /// The identifier that was looked up.
        id: String,
    },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_the_field() {
        let err = ConfigError::invalid("preset.lot_size", "must be > 0");
        assert_eq!(err.to_string(), "invalid preset.lot_size: must be > 0");
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = ConfigError::not_found("credentials", "api-7");
        assert!(err.to_string().contains("credentials"));
        assert!(err.to_string().contains("api-7"));
    }
}
