// =============================================================================
// auth.rs — WHO IS HOLDING THE CLIPBOARD
// =============================================================================
//
// The session knows who the user is. The controller only needs to know which
// side of the handshake they sit on. `AuthContext` is the seam; `SessionUser`
// is the implementation built from the backend's `user_type` field.
// =============================================================================

use crate::models::Role;

/// Synchronous read of the current session's party flags.
pub trait AuthContext: Send + Sync {
    fn is_cargo_owner(&self) -> bool;
    fn is_transporter(&self) -> bool;
}

/// A logged-in user as the backend describes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUser {
    pub user_type: Option<String>,
}

impl SessionUser {
    pub fn from_user_type(user_type: Option<String>) -> Self {
        Self {
            user_type: user_type.map(|t| t.trim().to_ascii_lowercase()),
        }
    }
}

impl AuthContext for SessionUser {
    fn is_cargo_owner(&self) -> bool {
        self.user_type.as_deref() == Some("cargo_owner")
    }

    fn is_transporter(&self) -> bool {
        self.user_type.as_deref() == Some("transporter")
    }
}

/// Collapse the two flags into a role. `None` means the session may only
/// look (admins, anonymous users, anything else).
///
/// A context claiming both resolves to the cargo owner.
pub fn resolve_role(ctx: &dyn AuthContext) -> Option<Role> {
    if ctx.is_cargo_owner() {
        Some(Role::CargoOwner)
    } else if ctx.is_transporter() {
        Some(Role::Transporter)
    } else {
        None
    }
}
