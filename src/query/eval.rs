//! Pure evaluation of a [`QuerySpec`](super::QuerySpec) against JSON
//! documents. The in-memory store is built on these functions; they also
//! pin down the ordering/projection contract independent of any database.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::{Filter, FilterOp, Projection, QuerySpec, SortKey, SortDir, REV_FIELD};

pub type Document = Map<String, Value>;

/// Dotted-path field lookup, `start_location.description` style.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Total order over JSON values: values of the same type compare naturally,
/// mixed types fall back to the jsonb type rank (null < number < string <
/// bool < array < object) so both store implementations order identically.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A filter on a missing field never matches.
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    let Some(actual) = lookup(doc, &filter.field) else {
        return false;
    };
    let ord = value_cmp(actual, &filter.value);
    match filter.op {
        FilterOp::Eq => ord == Ordering::Equal,
        FilterOp::Gt => ord == Ordering::Greater,
        FilterOp::Gte => ord != Ordering::Less,
        FilterOp::Lt => ord == Ordering::Less,
        FilterOp::Lte => ord != Ordering::Greater,
    }
}

pub fn matches_all(doc: &Document, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(doc, f))
}

/// Sorts by the given keys in order, each key breaking ties of the previous
/// one, with a final ascending id tie-break so the order is deterministic.
pub fn sort_docs(docs: &mut [Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let av = lookup(a, &key.field).unwrap_or(&Value::Null);
            let bv = lookup(b, &key.field).unwrap_or(&Value::Null);
            let ord = match key.dir {
                SortDir::Asc => value_cmp(av, bv),
                SortDir::Desc => value_cmp(bv, av),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        let aid = lookup(a, "id").unwrap_or(&Value::Null);
        let bid = lookup(b, "id").unwrap_or(&Value::Null);
        value_cmp(aid, bid)
    });
}

/// Applies the projection. The id survives an include list; the revision
/// counter only appears when explicitly requested.
pub fn project(doc: &Document, projection: &Projection) -> Document {
    match projection {
        Projection::Default => {
            let mut out = doc.clone();
            out.remove(REV_FIELD);
            out
        }
        Projection::Include(fields) => {
            let mut out = Document::new();
            if let Some(id) = doc.get("id") {
                out.insert("id".into(), id.clone());
            }
            for field in fields {
                if let Some(v) = doc.get(field) {
                    out.insert(field.clone(), v.clone());
                }
            }
            out
        }
    }
}

/// Skip/take pagination. Negative or zero skip starts at the beginning;
/// a non-positive limit yields nothing (the spec passes insane values
/// through, so they land here unchanged).
pub fn paginate(docs: Vec<Document>, spec: &QuerySpec) -> Vec<Document> {
    let skip = spec.skip().max(0) as usize;
    let take = spec.limit.max(0) as usize;
    docs.into_iter().skip(skip).take(take).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().expect("object literal").clone()
    }

    #[test]
    fn filters_match_numbers_and_strings() {
        let d = doc(json!({"price": 497, "difficulty": "easy"}));
        assert!(matches(&d, &Filter::eq("difficulty", "easy")));
        assert!(!matches(&d, &Filter::eq("difficulty", "medium")));
        assert!(matches(
            &d,
            &Filter {
                field: "price".into(),
                op: FilterOp::Gte,
                value: json!(497)
            }
        ));
        assert!(!matches(
            &d,
            &Filter {
                field: "price".into(),
                op: FilterOp::Gt,
                value: json!(497)
            }
        ));
    }

    #[test]
    fn missing_field_never_matches() {
        let d = doc(json!({"price": 100}));
        assert!(!matches(
            &d,
            &Filter {
                field: "duration".into(),
                op: FilterOp::Lte,
                value: json!(5)
            }
        ));
    }

    #[test]
    fn dotted_path_lookup_works() {
        let d = doc(json!({"start_location": {"address": "Banff"}}));
        assert!(matches(&d, &Filter::eq("start_location.address", "Banff")));
    }

    #[test]
    fn sort_applies_tie_breaks_in_order() {
        // price desc, name asc: expect C, A, B
        let mut docs = vec![
            doc(json!({"price": 10, "name": "B"})),
            doc(json!({"price": 10, "name": "A"})),
            doc(json!({"price": 5, "name": "C"})),
        ];
        let keys = vec![
            SortKey {
                field: "price".into(),
                dir: SortDir::Desc,
            },
            SortKey {
                field: "name".into(),
                dir: SortDir::Asc,
            },
        ];
        sort_docs(&mut docs, &keys);
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d.get("name").and_then(Value::as_str).unwrap())
            .collect();
        // price desc puts the 10s first; name asc breaks their tie
        assert_eq!(names, vec!["A", "B", "C"]);

        let keys = vec![
            SortKey {
                field: "price".into(),
                dir: SortDir::Asc,
            },
            SortKey {
                field: "name".into(),
                dir: SortDir::Asc,
            },
        ];
        sort_docs(&mut docs, &keys);
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d.get("name").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[test]
    fn default_projection_hides_rev() {
        let d = doc(json!({"id": "x", "name": "Forest Hiker", "rev": 3}));
        let out = project(&d, &Projection::Default);
        assert!(!out.contains_key("rev"));
        assert!(out.contains_key("name"));
    }

    #[test]
    fn include_projection_keeps_id_and_listed_fields() {
        let d = doc(json!({"id": "x", "name": "n", "price": 1, "summary": "s"}));
        let out = project(&d, &Projection::Include(vec!["name".into()]));
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("id"));
        assert!(out.contains_key("name"));
    }

    #[test]
    fn pagination_skips_and_takes() {
        let docs: Vec<Document> = (1..=12).map(|i| doc(json!({"n": i}))).collect();
        let spec = QuerySpec {
            page: 2,
            limit: 5,
            ..Default::default()
        };
        let page = paginate(docs, &spec);
        let ns: Vec<i64> = page
            .iter()
            .map(|d| d.get("n").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ns, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn negative_pagination_yields_nothing_or_start() {
        let docs: Vec<Document> = (1..=3).map(|i| doc(json!({"n": i}))).collect();
        let spec = QuerySpec {
            page: -2,
            limit: 2,
            ..Default::default()
        };
        // negative skip clamps to the start
        assert_eq!(paginate(docs.clone(), &spec).len(), 2);
        let spec = QuerySpec {
            page: 1,
            limit: 0,
            ..Default::default()
        };
        assert!(paginate(docs, &spec).is_empty());
    }
}
