//! Session identity.

use crate::error::{ChatError, Result};

/// Display name chosen once per session. Never blank.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Validate a display name. Surrounding whitespace is trimmed.
    pub fn new(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidSession(
                "session identity must not be blank".to_string(),
            ));
        }
        Ok(SessionIdentity(trimmed.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_rejected() {
        assert!(matches!(
            SessionIdentity::new("   "),
            Err(ChatError::InvalidSession(_))
        ));
        assert!(SessionIdentity::new("").is_err());
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(SessionIdentity::new("  alice ").unwrap().as_str(), "alice");
    }
}
