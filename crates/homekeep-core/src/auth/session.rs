use serde::{Deserialize, Serialize};

/// Signed-in user as reported by the login, refresh and "who am I" endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserIdentity {
    /// Name for display, falling back to the email address
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// Derived view of the current session.
///
/// Built on demand from the token store and the last known identity; it is
/// never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub authenticated: bool,
    pub user: Option<UserIdentity>,
}

impl AuthSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity() {
        let json = r#"{"id":"u-1","email":"pat@example.com","name":"Pat Doe","role":"owner"}"#;
        let user: UserIdentity = serde_json::from_str(json).expect("identity json");
        assert_eq!(user.id, "u-1");
        assert_eq!(user.display_name(), "Pat Doe");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = UserIdentity {
            id: "u-2".into(),
            email: "sam@example.com".into(),
            name: Some(" ".into()),
        };
        assert_eq!(user.display_name(), "sam@example.com");
    }
}
