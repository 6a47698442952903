//! Normalized identity returned by credential validation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named capability and whether it is granted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub name: String,
    pub granted: bool,
}

impl Privilege {
    pub fn new(name: impl Into<String>, granted: bool) -> Self {
        Self {
            name: name.into(),
            granted,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.granted)
    }
}

/// Result of validating a username and password.
///
/// Groups are in discovery order. A result that is not authenticated never
/// carries groups or privileges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    username: String,
    authenticated: bool,
    groups: Vec<String>,
    privileges: Vec<Privilege>,
}

impl AuthResult {
    /// Rejected credentials
    pub fn denied(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            authenticated: false,
            groups: Vec::new(),
            privileges: Vec::new(),
        }
    }

    /// Accepted credentials with the memberships found for them
    pub fn granted(
        username: impl Into<String>,
        groups: Vec<String>,
        privileges: Vec<Privilege>,
    ) -> Self {
        Self {
            username: username.into(),
            authenticated: true,
            groups,
            privileges,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn privileges(&self) -> &[Privilege] {
        &self.privileges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_is_empty() {
        let result = AuthResult::denied("alice");
        assert_eq!(result.username(), "alice");
        assert!(!result.authenticated());
        assert!(result.groups().is_empty());
        assert!(result.privileges().is_empty());
    }

    #[test]
    fn test_granted_keeps_order() {
        let result = AuthResult::granted(
            "alice",
            vec!["wheel".to_string(), "docker".to_string()],
            vec![Privilege::new("SeShutdownPrivilege", false)],
        );
        assert!(result.authenticated());
        assert_eq!(result.groups(), ["wheel", "docker"]);
        assert_eq!(result.privileges()[0].to_string(), "SeShutdownPrivilege: false");
    }

    #[test]
    fn test_json_shape() {
        let result = AuthResult::granted("bob", vec!["sudo".to_string()], Vec::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["username"], "bob");
        assert_eq!(json["authenticated"], true);
        assert_eq!(json["groups"][0], "sudo");
        assert!(json["privileges"].as_array().unwrap().is_empty());
    }
}
