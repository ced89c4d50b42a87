//! Query-string parsing: turns raw request query pairs into a [`QuerySpec`]
//! describing filtering, sorting, field projection and pagination. The spec
//! is only a description; executing it belongs to the document store.

pub mod eval;

use serde_json::Value;

/// Control keys that never become filters.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Field holding the internal revision counter, hidden unless asked for.
pub const REV_FIELD: &str = "rev";

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub dir: SortDir,
}

/// Output-field selection. `Default` keeps every field except [`REV_FIELD`];
/// an include list keeps exactly the named fields plus the document id.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Default,
    Include(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub page: i64,
    pub limit: i64,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: vec![SortKey {
                field: "created_at".into(),
                dir: SortDir::Desc,
            }],
            projection: Projection::Default,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl QuerySpec {
    /// Builds a spec from decoded query pairs, applying the stages in the
    /// fixed order filter, sort, fields, paginate. Later duplicates of a
    /// control key win; duplicate filter keys all apply (AND).
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
        let mut spec = Self::default();
        spec.apply_filters(&pairs);
        spec.apply_sort(&pairs);
        spec.apply_fields(&pairs);
        spec.apply_pagination(&pairs);
        spec
    }

    /// Adds an equality filter outside of query-string parsing, e.g. the
    /// tour scope of a nested review listing.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn skip(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    fn apply_filters(&mut self, pairs: &[(&str, &str)]) {
        for (key, raw) in pairs {
            let (field, op) = match parse_filter_key(key) {
                Some(parsed) => parsed,
                None => continue,
            };
            self.filters.push(Filter {
                field,
                op,
                value: coerce_value(raw),
            });
        }
    }

    fn apply_sort(&mut self, pairs: &[(&str, &str)]) {
        let Some(raw) = last_value(pairs, "sort") else {
            return;
        };
        let keys: Vec<SortKey> = raw
            .split(',')
            .filter(|f| !f.is_empty())
            .map(|f| match f.strip_prefix('-') {
                Some(name) => SortKey {
                    field: name.to_string(),
                    dir: SortDir::Desc,
                },
                None => SortKey {
                    field: f.to_string(),
                    dir: SortDir::Asc,
                },
            })
            .collect();
        if !keys.is_empty() {
            self.sort = keys;
        }
    }

    fn apply_fields(&mut self, pairs: &[(&str, &str)]) {
        let Some(raw) = last_value(pairs, "fields") else {
            return;
        };
        let fields: Vec<String> = raw
            .split(',')
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if !fields.is_empty() {
            self.projection = Projection::Include(fields);
        }
    }

    fn apply_pagination(&mut self, pairs: &[(&str, &str)]) {
        if let Some(raw) = last_value(pairs, "page") {
            if let Ok(page) = raw.parse::<i64>() {
                self.page = page;
            }
        }
        if let Some(raw) = last_value(pairs, "limit") {
            if let Ok(limit) = raw.parse::<i64>() {
                self.limit = limit;
            }
        }
    }
}

/// Splits `price[gte]` into field and operator; bare keys are equality.
/// Reserved control keys yield no filter.
fn parse_filter_key(key: &str) -> Option<(String, FilterOp)> {
    if RESERVED_KEYS.contains(&key) {
        return None;
    }
    if let Some(open) = key.find('[') {
        if let Some(stripped) = key[open + 1..].strip_suffix(']') {
            if let Some(op) = FilterOp::from_suffix(stripped) {
                return Some((key[..open].to_string(), op));
            }
        }
        // unknown suffix, treat the whole key as a literal field name
        return Some((key.to_string(), FilterOp::Eq));
    }
    Some((key.to_string(), FilterOp::Eq))
}

fn last_value<'a>(pairs: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
}

/// Query-string values are untyped; coerce to the JSON type they look like
/// so numeric comparisons compare numbers, not digit strings.
pub fn coerce_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}
