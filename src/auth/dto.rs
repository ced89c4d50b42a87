use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::{Role, User};

/// Request body for signup. Presence is validated in the handler so missing
/// fields surface as 400s from our own taxonomy.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub current_password: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned after signup, login and the password operations that re-issue
/// a token.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

/// Client-facing part of an identity.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            photo: user.photo.clone(),
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_serializes_without_credentials() {
        let response = PublicUser {
            id: Uuid::new_v4(),
            name: "Jonas".into(),
            email: "jonas@example.com".into(),
            photo: None,
            role: Role::LeadGuide,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("jonas@example.com"));
        assert!(json.contains("lead-guide"));
        assert!(!json.contains("password"));
    }
}
