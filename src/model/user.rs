//! Tracker users.

use std::fmt;

/// A tracker user. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Backend-scoped user id.
    pub id: String,
    /// Login or account name.
    pub name: String,
    /// Display name.
    pub real_name: String,
    /// Team the user belongs to, when the backend reports one.
    pub team: Option<String>,
}

impl User {
    /// The display name, falling back to the login name.
    pub fn display_name(&self) -> &str {
        if self.real_name.is_empty() {
            &self.name
        } else {
            &self.real_name
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefers_real_name() {
        let user = User {
            id: "1".to_string(),
            name: "jdoe".to_string(),
            real_name: "Jane Doe".to_string(),
            team: None,
        };
        assert_eq!(user.to_string(), "Jane Doe");
    }

    #[test]
    fn test_display_falls_back_to_login() {
        let user = User {
            id: "1".to_string(),
            name: "jdoe".to_string(),
            real_name: String::new(),
            team: None,
        };
        assert_eq!(user.display_name(), "jdoe");
    }
}
