use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw username and password pair.
///
/// Held in memory only; the password never reaches Debug output or logs.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl UserPass {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Named cookie carrying a sealed credential value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Bearer token carrying a sealed credential value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub value: String,
    pub description: String,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: description.into(),
        }
    }
}
