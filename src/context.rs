//! Per-request session context
//!
//! Every mutating operation takes the acting user explicitly instead of
//! reading it from ambient state. The HTTP layer builds one from the bearer
//! token; local CLI commands use [`SessionContext::system`].

use crate::entities::{Role, User};
use crate::error::{Error, Result};

/// User id recorded for changes made by local tooling (import, bootstrap)
pub const SYSTEM_USER_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user: User,
    pub ip_address: Option<String>,
}

impl SessionContext {
    pub fn new(user: User, ip_address: Option<String>) -> Self {
        SessionContext { user, ip_address }
    }

    pub fn system() -> Self {
        SessionContext {
            user: User {
                id: SYSTEM_USER_ID,
                username: "system".to_string(),
                full_name: "Local administration".to_string(),
                role: Role::SuperAdmin,
            },
            ip_address: None,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.user.role.can_administer() {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role {} cannot perform administrative operations",
                self.user.role.as_str()
            )))
        }
    }
}
