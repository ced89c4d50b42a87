use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::query::Filter;
use crate::store::{Access, Document, DocumentStore};

use super::user::{Role, User};

pub const USERS: &str = "users";

/// User persistence over the document store. Everything here runs with
/// privileged access; it is the only code that touches credential fields.
pub struct UserRepo<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> UserRepo<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    fn to_user(doc: Document) -> anyhow::Result<User> {
        serde_json::from_value(Value::Object(doc)).map_err(|e| anyhow::anyhow!("bad user doc: {e}"))
    }

    pub async fn create(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> anyhow::Result<User> {
        let doc = json!({
            "name": name,
            "email": email,
            "role": role,
            "active": true,
            "password_hash": password_hash,
        });
        let created = self
            .store
            .insert(USERS, doc.as_object().cloned().unwrap_or_default())
            .await?;
        Self::to_user(created)
    }

    pub async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let doc = self
            .store
            .find_one(USERS, &[Filter::eq("email", email)], Access::Privileged)
            .await?;
        doc.map(Self::to_user).transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let doc = self.store.find_by_id(USERS, id, Access::Privileged).await?;
        doc.map(Self::to_user).transpose()
    }

    pub async fn find_by_reset_hash(&self, digest: &str) -> anyhow::Result<Option<User>> {
        let doc = self
            .store
            .find_one(
                USERS,
                &[Filter::eq("password_reset_hash", digest)],
                Access::Privileged,
            )
            .await?;
        doc.map(Self::to_user).transpose()
    }

    /// Replaces the credential and clears any outstanding reset token.
    pub async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: i64,
    ) -> anyhow::Result<()> {
        let patch = json!({
            "password_hash": password_hash,
            "password_changed_at": changed_at,
            "password_reset_hash": null,
            "password_reset_expires": null,
        });
        self.store
            .update_by_id(USERS, id, patch.as_object().cloned().unwrap_or_default())
            .await?;
        Ok(())
    }

    pub async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: i64,
    ) -> anyhow::Result<()> {
        let patch = json!({
            "password_reset_hash": digest,
            "password_reset_expires": expires_at,
        });
        self.store
            .update_by_id(USERS, id, patch.as_object().cloned().unwrap_or_default())
            .await?;
        Ok(())
    }

    pub async fn clear_reset_token(&self, id: Uuid) -> anyhow::Result<()> {
        let patch = json!({
            "password_reset_hash": null,
            "password_reset_expires": null,
        });
        self.store
            .update_by_id(USERS, id, patch.as_object().cloned().unwrap_or_default())
            .await?;
        Ok(())
    }
}

/// Fresh single-use reset token: the raw form travels by email, only the
/// digest is ever stored.
pub fn generate_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);
    let digest = reset_token_digest(&raw);
    (raw, digest)
}

pub fn reset_token_digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_token_and_digest_differ_and_are_stable() {
        let (raw, digest) = generate_reset_token();
        assert_ne!(raw, digest);
        assert_eq!(digest, reset_token_digest(&raw));
        assert_eq!(raw.len(), 64);
    }

    #[test]
    fn distinct_tokens_every_time() {
        let (a, _) = generate_reset_token();
        let (b, _) = generate_reset_token();
        assert_ne!(a, b);
    }
}
