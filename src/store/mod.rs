//! Document-access capability. Handlers and repos talk to [`DocumentStore`];
//! the Postgres implementation backs production, the in-memory one backs
//! tests and `AppState::fake()`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::query::{Filter, QuerySpec};

pub type Document = Map<String, Value>;

/// Credential material that the public access path never returns, no matter
/// what projection a request asks for.
pub const SECRET_FIELDS: [&str; 4] = [
    "password_hash",
    "password_changed_at",
    "password_reset_hash",
    "password_reset_expires",
];

/// `Public` strips secret fields and the revision counter; `Privileged` is
/// reserved for the auth repo, which needs the credential columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Privileged,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Executes a full query description. Always public access.
    async fn find(&self, collection: &str, spec: &QuerySpec) -> anyhow::Result<Vec<Document>>;

    async fn find_one(
        &self,
        collection: &str,
        filters: &[Filter],
        access: Access,
    ) -> anyhow::Result<Option<Document>>;

    async fn find_by_id(
        &self,
        collection: &str,
        id: Uuid,
        access: Access,
    ) -> anyhow::Result<Option<Document>>;

    async fn insert(&self, collection: &str, doc: Document) -> anyhow::Result<Document>;

    /// Merge-patches a document; a `null` value removes the key. Bumps the
    /// revision counter. Returns the updated document or `None` when absent.
    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Document,
    ) -> anyhow::Result<Option<Document>>;

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> anyhow::Result<bool>;
}

pub(crate) fn strip_secrets(doc: &mut Document) {
    for field in SECRET_FIELDS {
        doc.remove(field);
    }
}
