use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed role set used for authorization decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

/// Identity record as the privileged store path returns it. Only the auth
/// layer ever sees the credential fields; everything client-facing goes
/// through [`PublicUser`](super::dto::PublicUser).
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
    pub password_hash: String,
    /// Unix seconds of the last password change; unset for fresh signups.
    #[serde(default)]
    pub password_changed_at: Option<i64>,
    #[serde(default)]
    pub password_reset_hash: Option<String>,
    /// Unix seconds after which the reset token is dead.
    #[serde(default)]
    pub password_reset_expires: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

fn default_active() -> bool {
    true
}

impl User {
    /// True when the password changed at or after the token's issued-at,
    /// which is what invalidates every token issued before the change.
    pub fn changed_password_after(&self, token_iat: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => changed >= token_iat,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(changed: Option<i64>) -> User {
        serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "Jonas",
            "email": "jonas@example.com",
            "password_hash": "$argon2id$fake",
            "password_changed_at": changed,
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .expect("user fixture")
    }

    #[test]
    fn roles_use_kebab_case_wire_names() {
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), json!("lead-guide"));
        assert_eq!(
            serde_json::from_value::<Role>(json!("admin")).unwrap(),
            Role::Admin
        );
    }

    #[test]
    fn unchanged_password_never_invalidates() {
        assert!(!user(None).changed_password_after(0));
    }

    #[test]
    fn change_at_or_after_iat_invalidates() {
        let u = user(Some(1_000));
        assert!(u.changed_password_after(900));
        assert!(u.changed_password_after(1_000));
        assert!(!u.changed_password_after(1_001));
    }

    #[test]
    fn active_defaults_to_true() {
        assert!(user(None).active);
    }
}
