use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Exchange API credentials, already decrypted by the secrets facility.
#[derive(Clone, Deserialize)]
#[serde(from = "CredentialsDocument")]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: SecretString,
}

#[derive(Deserialize)]
struct CredentialsDocument {
    api_key: String,
    api_secret: String,
}

impl From<CredentialsDocument> for Credentials {
    fn from(doc: CredentialsDocument) -> Self {
        Self::new(doc.api_key, doc.api_secret)
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// True when both halves are present. Checked before any exchange call.
    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secret() {
        let creds = Credentials::new("key-1", "very-secret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("key-1"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn deserializes_from_plain_document() {
        let creds: Credentials =
            serde_json::from_str(r#"{"api_key":"k","api_secret":"s"}"#).unwrap();
        assert_eq!(creds.api_key, "k");
        assert_eq!(creds.api_secret.expose_secret(), "s");
    }

    #[test]
    fn blank_secret_is_incomplete() {
        assert!(!Credentials::new("key-1", "  ").is_complete());
        assert!(Credentials::new("key-1", "s").is_complete());
    }
}
