//! In-memory [`DocumentStore`] used by tests and `AppState::fake()`. Shares
//! the evaluation code in `query::eval` so its semantics match Postgres.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::query::eval;
use crate::query::{Filter, QuerySpec, REV_FIELD};

use super::{strip_secrets, Access, Document, DocumentStore};

/// Fixed-width fraction so creation timestamps order lexicographically,
/// matching what the Postgres store emits.
const TS_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

struct Stored {
    id: Uuid,
    rev: i64,
    created_at: OffsetDateTime,
    doc: Document,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Stored>>,
    last_ts: Option<OffsetDateTime>,
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly increasing, microsecond-granular creation timestamps keep
    /// the default newest-first order stable even for back-to-back inserts.
    fn next_ts(inner: &mut Inner) -> OffsetDateTime {
        let mut now = OffsetDateTime::now_utc();
        let micros = now.nanosecond() / 1_000 * 1_000;
        now = now.replace_nanosecond(micros).unwrap_or(now);
        if let Some(last) = inner.last_ts {
            if now <= last {
                now = last + time::Duration::microseconds(1);
            }
        }
        inner.last_ts = Some(now);
        now
    }
}

fn materialize(stored: &Stored) -> anyhow::Result<Document> {
    let mut doc = stored.doc.clone();
    doc.insert("id".into(), Value::String(stored.id.to_string()));
    doc.insert(
        "created_at".into(),
        Value::String(stored.created_at.format(TS_FORMAT)?),
    );
    doc.insert(REV_FIELD.into(), Value::from(stored.rev));
    Ok(doc)
}

fn view(stored: &Stored, access: Access) -> anyhow::Result<Document> {
    let mut doc = materialize(stored)?;
    if access == Access::Public {
        strip_secrets(&mut doc);
        doc.remove(REV_FIELD);
    }
    Ok(doc)
}

#[async_trait]
impl DocumentStore for MemStore {
    async fn find(&self, collection: &str, spec: &QuerySpec) -> anyhow::Result<Vec<Document>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut docs = Vec::new();
        if let Some(stored) = inner.collections.get(collection) {
            for s in stored {
                let mut doc = materialize(s)?;
                strip_secrets(&mut doc);
                if eval::matches_all(&doc, &spec.filters) {
                    docs.push(doc);
                }
            }
        }
        drop(inner);
        eval::sort_docs(&mut docs, &spec.sort);
        let docs = eval::paginate(docs, spec);
        Ok(docs
            .iter()
            .map(|d| eval::project(d, &spec.projection))
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filters: &[Filter],
        access: Access,
    ) -> anyhow::Result<Option<Document>> {
        let inner = self.inner.read().expect("store lock poisoned");
        if let Some(stored) = inner.collections.get(collection) {
            for s in stored {
                let doc = view(s, access)?;
                if eval::matches_all(&doc, filters) {
                    return Ok(Some(doc));
                }
            }
        }
        Ok(None)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: Uuid,
        access: Access,
    ) -> anyhow::Result<Option<Document>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let Some(stored) = inner.collections.get(collection) else {
            return Ok(None);
        };
        match stored.iter().find(|s| s.id == id) {
            Some(s) => Ok(Some(view(s, access)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, collection: &str, doc: Document) -> anyhow::Result<Document> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let created_at = MemStore::next_ts(&mut inner);
        let mut doc = doc;
        doc.remove("id");
        doc.remove("created_at");
        doc.remove(REV_FIELD);
        let stored = Stored {
            id: Uuid::new_v4(),
            rev: 1,
            created_at,
            doc,
        };
        let out = materialize(&stored)?;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(stored);
        Ok(out)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Document,
    ) -> anyhow::Result<Option<Document>> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Some(stored) = inner.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(s) = stored.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        for (key, value) in patch {
            if key == "id" || key == "created_at" || key == REV_FIELD {
                continue;
            }
            if value.is_null() {
                s.doc.remove(&key);
            } else {
                s.doc.insert(key, value);
            }
        }
        s.rev += 1;
        Ok(Some(materialize(s)?))
    }

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Some(stored) = inner.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = stored.len();
        stored.retain(|s| s.id != id);
        Ok(stored.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().expect("object literal").clone()
    }

    #[tokio::test]
    async fn insert_then_find_by_id_roundtrip() {
        let store = MemStore::new();
        let created = store
            .insert("tours", doc(json!({"name": "Forest Hiker", "price": 497})))
            .await
            .unwrap();
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
        let found = store
            .find_by_id("tours", id, Access::Public)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], json!("Forest Hiker"));
        assert!(found.contains_key("created_at"));
        assert!(!found.contains_key("rev"));
    }

    #[tokio::test]
    async fn default_order_is_newest_first() {
        let store = MemStore::new();
        for name in ["first", "second", "third"] {
            store
                .insert("tours", doc(json!({ "name": name })))
                .await
                .unwrap();
        }
        let docs = store
            .find("tours", &QuerySpec::default())
            .await
            .unwrap();
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn filters_sorting_and_projection_compose() {
        let store = MemStore::new();
        for (name, price, difficulty) in [
            ("a", 400, "easy"),
            ("b", 900, "difficult"),
            ("c", 700, "medium"),
            ("d", 100, "medium"),
        ] {
            store
                .insert(
                    "tours",
                    doc(json!({"name": name, "price": price, "difficulty": difficulty})),
                )
                .await
                .unwrap();
        }
        let spec = QuerySpec::from_pairs(vec![
            ("price[gte]", "400"),
            ("sort", "-price"),
            ("fields", "name,price"),
        ]);
        let docs = store.find("tours", &spec).await.unwrap();
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        assert!(docs.iter().all(|d| !d.contains_key("difficulty")));
        assert!(docs.iter().all(|d| d.contains_key("id")));
    }

    #[tokio::test]
    async fn update_merges_and_null_removes() {
        let store = MemStore::new();
        let created = store
            .insert("tours", doc(json!({"name": "x", "slug": "x", "price": 1})))
            .await
            .unwrap();
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
        let updated = store
            .update_by_id("tours", id, doc(json!({"price": 2, "slug": null})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["price"], json!(2));
        assert!(!updated.contains_key("slug"));
        assert_eq!(updated["rev"], json!(2));
    }

    #[tokio::test]
    async fn public_access_never_exposes_credentials() {
        let store = MemStore::new();
        let created = store
            .insert(
                "users",
                doc(json!({
                    "email": "guide@example.com",
                    "password_hash": "$argon2id$fake",
                    "password_reset_hash": "abc",
                })),
            )
            .await
            .unwrap();
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

        // even an explicit projection request cannot pull secrets out
        let spec = QuerySpec::from_pairs(vec![("fields", "email,password_hash")]);
        let docs = store.find("users", &spec).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].contains_key("password_hash"));

        let public = store
            .find_by_id("users", id, Access::Public)
            .await
            .unwrap()
            .unwrap();
        assert!(!public.contains_key("password_hash"));

        let privileged = store
            .find_by_id("users", id, Access::Privileged)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(privileged["password_hash"], json!("$argon2id$fake"));
    }

    #[tokio::test]
    async fn delete_reports_outcome() {
        let store = MemStore::new();
        let created = store
            .insert("reviews", doc(json!({"rating": 5})))
            .await
            .unwrap();
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
        assert!(store.delete_by_id("reviews", id).await.unwrap());
        assert!(!store.delete_by_id("reviews", id).await.unwrap());
    }
}
