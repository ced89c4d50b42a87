//! Generic document handlers: every entity router composes these with its
//! own [`Resource`] descriptor and explicit eager-load joins, instead of
//! each entity re-implementing CRUD against the store.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::query::{Filter, QuerySpec};
use crate::store::{Access, Document, DocumentStore};

/// Explicit eager-load declaration, passed per operation by the caller.
#[derive(Debug, Clone, Copy)]
pub enum Join {
    /// Replace an id (or id-array) field with the referenced documents.
    Ref {
        field: &'static str,
        collection: &'static str,
        select: Option<&'static [&'static str]>,
    },
    /// Attach documents from another collection whose `foreign_field`
    /// points back at this document.
    Reverse {
        collection: &'static str,
        foreign_field: &'static str,
        as_field: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Resource {
    pub collection: &'static str,
}

impl Resource {
    pub const fn new(collection: &'static str) -> Self {
        Self { collection }
    }

    pub async fn list(
        &self,
        store: &dyn DocumentStore,
        spec: &QuerySpec,
        eager: &[Join],
    ) -> ApiResult<Vec<Document>> {
        let mut docs = store
            .find(self.collection, spec)
            .await
            .map_err(ApiError::Internal)?;
        apply_joins(store, &mut docs, eager).await?;
        Ok(docs)
    }

    pub async fn get(
        &self,
        store: &dyn DocumentStore,
        id: Uuid,
        eager: &[Join],
    ) -> ApiResult<Document> {
        let doc = store
            .find_by_id(self.collection, id, Access::Public)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;
        let mut docs = vec![doc];
        apply_joins(store, &mut docs, eager).await?;
        Ok(docs.remove(0))
    }

    pub async fn create(&self, store: &dyn DocumentStore, body: Value) -> ApiResult<Document> {
        let doc = as_object(body)?;
        let mut created = store
            .insert(self.collection, doc)
            .await
            .map_err(ApiError::Internal)?;
        public_view(&mut created);
        Ok(created)
    }

    pub async fn update(
        &self,
        store: &dyn DocumentStore,
        id: Uuid,
        body: Value,
    ) -> ApiResult<Document> {
        let patch = as_object(body)?;
        let mut updated = store
            .update_by_id(self.collection, id, patch)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::not_found("No document found with that ID"))?;
        public_view(&mut updated);
        Ok(updated)
    }

    pub async fn delete(&self, store: &dyn DocumentStore, id: Uuid) -> ApiResult<()> {
        let deleted = store
            .delete_by_id(self.collection, id)
            .await
            .map_err(ApiError::Internal)?;
        if !deleted {
            return Err(ApiError::not_found("No document found with that ID"));
        }
        Ok(())
    }
}

fn as_object(body: Value) -> ApiResult<Document> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::validation("Request body must be a JSON object")),
    }
}

/// Insert/update results come back privileged; reduce to the public view.
fn public_view(doc: &mut Document) {
    crate::store::strip_secrets(doc);
    doc.remove(crate::query::REV_FIELD);
}

fn select_fields(doc: &Document, select: Option<&[&str]>) -> Document {
    match select {
        None => doc.clone(),
        Some(fields) => {
            let mut out = Document::new();
            if let Some(id) = doc.get("id") {
                out.insert("id".into(), id.clone());
            }
            for field in fields {
                if let Some(v) = doc.get(*field) {
                    out.insert((*field).to_string(), v.clone());
                }
            }
            out
        }
    }
}

async fn embed_ref(
    store: &dyn DocumentStore,
    value: &Value,
    collection: &str,
    select: Option<&[&str]>,
) -> ApiResult<Value> {
    let Some(raw_id) = value.as_str() else {
        return Ok(value.clone());
    };
    let Ok(id) = raw_id.parse::<Uuid>() else {
        return Ok(value.clone());
    };
    let doc = store
        .find_by_id(collection, id, Access::Public)
        .await
        .map_err(ApiError::Internal)?;
    Ok(match doc {
        Some(d) => Value::Object(select_fields(&d, select)),
        None => Value::Null,
    })
}

async fn apply_joins(
    store: &dyn DocumentStore,
    docs: &mut [Document],
    joins: &[Join],
) -> ApiResult<()> {
    for join in joins {
        match *join {
            Join::Ref {
                field,
                collection,
                select,
            } => {
                for doc in docs.iter_mut() {
                    let Some(current) = doc.get(field).cloned() else {
                        continue;
                    };
                    let embedded = match current {
                        Value::Array(ids) => {
                            let mut out = Vec::with_capacity(ids.len());
                            for id in &ids {
                                out.push(embed_ref(store, id, collection, select).await?);
                            }
                            Value::Array(out)
                        }
                        other => embed_ref(store, &other, collection, select).await?,
                    };
                    doc.insert(field.to_string(), embedded);
                }
            }
            Join::Reverse {
                collection,
                foreign_field,
                as_field,
            } => {
                for doc in docs.iter_mut() {
                    let Some(id) = doc.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    let spec =
                        QuerySpec::default().with_filter(Filter::eq(foreign_field, id));
                    let related = store
                        .find(collection, &spec)
                        .await
                        .map_err(ApiError::Internal)?;
                    doc.insert(
                        as_field.to_string(),
                        Value::Array(related.into_iter().map(Value::Object).collect()),
                    );
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().expect("object literal").clone()
    }

    #[tokio::test]
    async fn get_missing_document_is_404() {
        let store = MemStore::new();
        let res = Resource::new("tours");
        let err = res.get(&store, Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_rejects_non_object_bodies() {
        let store = MemStore::new();
        let res = Resource::new("tours");
        let err = res.create(&store, json!([1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn ref_join_embeds_referenced_documents() {
        let store = MemStore::new();
        let guide = store
            .insert("users", doc(json!({"name": "Lena", "email": "l@x.com"})))
            .await
            .unwrap();
        let guide_id = guide["id"].as_str().unwrap().to_string();
        let res = Resource::new("tours");
        let tour = res
            .create(
                &store,
                json!({"name": "Forest Hiker", "guides": [guide_id]}),
            )
            .await
            .unwrap();
        let id: Uuid = tour["id"].as_str().unwrap().parse().unwrap();

        let fetched = res
            .get(
                &store,
                id,
                &[Join::Ref {
                    field: "guides",
                    collection: "users",
                    select: Some(&["name"]),
                }],
            )
            .await
            .unwrap();
        let guides = fetched["guides"].as_array().unwrap();
        assert_eq!(guides[0]["name"], json!("Lena"));
        assert!(guides[0].get("email").is_none());
    }

    #[tokio::test]
    async fn reverse_join_attaches_children() {
        let store = MemStore::new();
        let tours = Resource::new("tours");
        let tour = tours
            .create(&store, json!({"name": "Sea Explorer"}))
            .await
            .unwrap();
        let tour_id = tour["id"].as_str().unwrap().to_string();
        store
            .insert("reviews", doc(json!({"review": "great", "tour": tour_id})))
            .await
            .unwrap();

        let id: Uuid = tour["id"].as_str().unwrap().parse().unwrap();
        let fetched = tours
            .get(
                &store,
                id,
                &[Join::Reverse {
                    collection: "reviews",
                    foreign_field: "tour",
                    as_field: "reviews",
                }],
            )
            .await
            .unwrap();
        let reviews = fetched["reviews"].as_array().unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0]["review"], json!("great"));
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_documents() {
        let store = MemStore::new();
        let res = Resource::new("tours");
        let err = res
            .update(&store, Uuid::new_v4(), json!({"price": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        let err = res.delete(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
