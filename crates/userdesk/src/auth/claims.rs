//! Token claims.

use serde::{Deserialize, Serialize};

/// Role name that unlocks user administration.
pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by an issued token.
///
/// `roles` holds role *names* as stored in the role table, so a role
/// granted after the token was issued only takes effect with a new token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.eq_ignore_ascii_case(name))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Name, then email, then the bare id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(roles: &[&str]) -> Claims {
        Claims {
            sub: "usr_1".to_string(),
            iss: None,
            exp: 0,
            iat: None,
            email: None,
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_admin_comes_from_role_names() {
        assert!(!claims(&[]).is_admin());
        assert!(!claims(&["user", "editor"]).is_admin());
        assert!(claims(&["user", "Admin"]).is_admin());
        assert!(claims(&["editor"]).has_role("EDITOR"));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut c = claims(&[]);
        assert_eq!(c.display_name(), "usr_1");

        c.email = Some("jane@example.com".to_string());
        assert_eq!(c.display_name(), "jane@example.com");

        c.name = Some("Jane".to_string());
        assert_eq!(c.display_name(), "Jane");
    }

    #[test]
    fn test_missing_roles_deserialize_empty() {
        let c: Claims = serde_json::from_str(r#"{"sub":"usr_9","exp":1}"#).unwrap();
        assert!(c.roles.is_empty());
        assert!(c.iss.is_none());
    }
}
