// 👤 User Entity + credentials
//
// Tokens are random UUIDs handed out once: a non-expiring API token when the
// user is created, and an expiring session token on every login. Only their
// SHA-256 hash is stored; a request is authenticated by hashing the presented
// token. Passwords are stored as a salted SHA-256 digest.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Operator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "OPERATOR",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// Admins manage stations, pumps and users, and read the admin views
    pub fn can_administer(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OPERATOR" => Ok(Role::Operator),
            "ADMIN" => Ok(Role::Admin),
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            other => Err(Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl User {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "fullName": self.full_name,
            "role": self.role,
        })
    }
}

/// Shortest password accepted for interactive login
pub const MIN_PASSWORD_LEN: usize = 8;

/// Body of `POST /admin/users`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub role: Role,
    /// Without one the user can only use its API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::Validation("username is required".to_string()));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(Error::Validation(
                "username cannot contain whitespace".to_string(),
            ));
        }
        if let Some(password) = &self.password {
            if password.chars().count() < MIN_PASSWORD_LEN {
                return Err(Error::Validation(format!(
                    "password must be at least {} characters",
                    MIN_PASSWORD_LEN
                )));
            }
        }
        Ok(())
    }
}

/// Stored form of a password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub hash: String,
    pub salt: String,
}

impl Credentials {
    pub fn derive(password: &str) -> Self {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        Credentials {
            hash: hash_password(password, &salt),
            salt,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        hash_password(password, &self.salt) == self.hash
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Body of `POST /auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    /// Seconds until the token stops being accepted
    pub expires_in: i64,
    pub user: User,
}

/// A freshly created user together with the only copy of its token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedUser {
    pub user: User,
    pub token: String,
}

pub fn issue_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
