//! Postgres-backed [`DocumentStore`]. Documents live in a single JSONB
//! table; query descriptions compose into SQL with `QueryBuilder`, so
//! filtering, ordering and pagination all run server-side.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::query::eval;
use crate::query::{Filter, FilterOp, QuerySpec, SortDir, REV_FIELD};

use super::{strip_secrets, Access, Document, DocumentStore, SECRET_FIELDS};

/// Stored JSONB merged with the column-backed id / created_at / rev, so
/// every field is addressable the same way the in-memory store sees it.
const MATERIALIZED: &str = "(doc || jsonb_build_object(\
     'id', id::text, \
     'created_at', to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS.US\"Z\"'), \
     'rev', rev))";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sql_op(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => " = ",
        FilterOp::Gt => " > ",
        FilterOp::Gte => " >= ",
        FilterOp::Lt => " < ",
        FilterOp::Lte => " <= ",
    }
}

fn path_array(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

fn touches_secret(field: &str) -> bool {
    let head = field.split('.').next().unwrap_or(field);
    SECRET_FIELDS.contains(&head)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    for f in filters {
        qb.push(" AND COALESCE(d.mdoc #> ");
        qb.push_bind(path_array(&f.field));
        qb.push(", 'null'::jsonb)");
        qb.push(sql_op(f.op));
        qb.push_bind(f.value.clone());
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, spec: &QuerySpec) {
    qb.push(" ORDER BY ");
    for key in &spec.sort {
        qb.push("COALESCE(d.mdoc #> ");
        qb.push_bind(path_array(&key.field));
        qb.push(", 'null'::jsonb)");
        qb.push(match key.dir {
            SortDir::Asc => " ASC, ",
            SortDir::Desc => " DESC, ",
        });
    }
    // deterministic tie-break, keeps pagination stable
    qb.push("d.id ASC");
}

fn row_doc(row: &sqlx::postgres::PgRow) -> anyhow::Result<Document> {
    let value: Value = row.try_get("mdoc").context("read materialized doc")?;
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object, got {other}"),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn find(&self, collection: &str, spec: &QuerySpec) -> anyhow::Result<Vec<Document>> {
        // the public path cannot probe credential fields
        if spec.filters.iter().any(|f| touches_secret(&f.field)) {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(format!(
            "SELECT d.mdoc, d.id FROM (SELECT {MATERIALIZED} AS mdoc, id FROM documents WHERE collection = "
        ));
        qb.push_bind(collection);
        qb.push(") d WHERE TRUE");
        push_filters(&mut qb, &spec.filters);
        push_order(&mut qb, spec);
        qb.push(" OFFSET ");
        qb.push_bind(spec.skip());
        qb.push(" LIMIT ");
        qb.push_bind(spec.limit);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("execute find query")?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut doc = row_doc(row)?;
            strip_secrets(&mut doc);
            docs.push(eval::project(&doc, &spec.projection));
        }
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: &str,
        filters: &[Filter],
        access: Access,
    ) -> anyhow::Result<Option<Document>> {
        if access == Access::Public && filters.iter().any(|f| touches_secret(&f.field)) {
            return Ok(None);
        }
        let mut qb = QueryBuilder::new(format!(
            "SELECT d.mdoc, d.id, d.created_at FROM (SELECT {MATERIALIZED} AS mdoc, id, created_at \
             FROM documents WHERE collection = "
        ));
        qb.push_bind(collection);
        qb.push(") d WHERE TRUE");
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY d.created_at ASC, d.id ASC LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .context("execute find_one query")?;
        match row {
            Some(row) => {
                let mut doc = row_doc(&row)?;
                if access == Access::Public {
                    strip_secrets(&mut doc);
                    doc.remove(REV_FIELD);
                }
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: Uuid,
        access: Access,
    ) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {MATERIALIZED} AS mdoc FROM documents WHERE collection = $1 AND id = $2"
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("execute find_by_id query")?;
        match row {
            Some(row) => {
                let mut doc = row_doc(&row)?;
                if access == Access::Public {
                    strip_secrets(&mut doc);
                    doc.remove(REV_FIELD);
                }
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, collection: &str, doc: Document) -> anyhow::Result<Document> {
        let mut doc = doc;
        doc.remove("id");
        doc.remove("created_at");
        doc.remove(REV_FIELD);
        let id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            "INSERT INTO documents (collection, id, doc) VALUES ($1, $2, $3) \
             RETURNING {MATERIALIZED} AS mdoc"
        ))
        .bind(collection)
        .bind(id)
        .bind(Value::Object(doc))
        .fetch_one(&self.pool)
        .await
        .context("insert document")?;
        row_doc(&row)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        patch: Document,
    ) -> anyhow::Result<Option<Document>> {
        let mut set = Document::new();
        let mut unset: Vec<String> = Vec::new();
        for (key, value) in patch {
            if key == "id" || key == "created_at" || key == REV_FIELD {
                continue;
            }
            if value.is_null() {
                unset.push(key);
            } else {
                set.insert(key, value);
            }
        }
        let row = sqlx::query(&format!(
            "UPDATE documents SET doc = (doc || $3) - $4::text[], rev = rev + 1 \
             WHERE collection = $1 AND id = $2 \
             RETURNING {MATERIALIZED} AS mdoc"
        ))
        .bind(collection)
        .bind(id)
        .bind(Value::Object(set))
        .bind(unset)
        .fetch_optional(&self.pool)
        .await
        .context("update document")?;
        match row {
            Some(row) => Ok(Some(row_doc(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete document")?;
        Ok(result.rows_affected() > 0)
    }
}
