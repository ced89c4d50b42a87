use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::extractors::CurrentUser;
use crate::auth::user::Role;
use crate::error::{ApiError, ApiResult};
use crate::query::QuerySpec;
use crate::resource::{Join, Resource};
use crate::state::AppState;
use crate::store::Document;

pub const TOURS: Resource = Resource::new("tours");

/// Guides are stored as user-id references; embed them on read.
const GUIDES_JOIN: Join = Join::Ref {
    field: "guides",
    collection: "users",
    select: None,
};

/// Reviews point back at their tour; attach them on single-tour reads.
const REVIEWS_JOIN: Join = Join::Reverse {
    collection: "reviews",
    foreign_field: "tour",
    as_field: "reviews",
};

const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];
const REQUIRED_FIELDS: [&str; 7] = [
    "name",
    "duration",
    "max_group_size",
    "difficulty",
    "price",
    "summary",
    "cover",
];

fn query_spec(pairs: &[(String, String)]) -> QuerySpec {
    QuerySpec::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

/// Spec for aggregate endpoints that must see the whole collection.
fn unbounded() -> QuerySpec {
    QuerySpec {
        limit: i64::MAX,
        ..Default::default()
    }
}

#[instrument(skip(state, _user))]
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Document>>> {
    let spec = query_spec(&pairs);
    let docs = TOURS
        .list(state.store.as_ref(), &spec, &[GUIDES_JOIN])
        .await?;
    Ok(Json(docs))
}

#[instrument(skip(state))]
pub async fn top_five_cheap(State(state): State<AppState>) -> ApiResult<Json<Vec<Document>>> {
    let spec = QuerySpec::from_pairs(vec![
        ("limit", "5"),
        ("sort", "-ratings_average,price"),
        ("fields", "name,price,ratings_average,summary,difficulty"),
    ]);
    let docs = TOURS.list(state.store.as_ref(), &spec, &[]).await?;
    Ok(Json(docs))
}

#[instrument(skip(state, _user))]
pub async fn get_one(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Document>> {
    let doc = TOURS
        .get(state.store.as_ref(), id, &[GUIDES_JOIN, REVIEWS_JOIN])
        .await?;
    Ok(Json(doc))
}

#[instrument(skip(state, _user, body))]
pub async fn create(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let mut doc = match body {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("Request body must be a JSON object")),
    };
    validate_tour(&doc, true)?;
    if let Some(slug) = doc.get("name").and_then(Value::as_str).map(slugify) {
        doc.insert("slug".into(), Value::String(slug));
    }
    let created = TOURS
        .create(state.store.as_ref(), Value::Object(doc))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, _user, body))]
pub async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Document>> {
    let mut patch = match body {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("Request body must be a JSON object")),
    };
    validate_tour(&patch, false)?;
    if let Some(slug) = patch.get("name").and_then(Value::as_str).map(slugify) {
        patch.insert("slug".into(), Value::String(slug));
    }
    let updated = TOURS
        .update(state.store.as_ref(), id, Value::Object(patch))
        .await?;
    Ok(Json(updated))
}

#[instrument(skip(state, user))]
pub async fn delete_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_role(&[Role::Admin, Role::LeadGuide])?;
    TOURS.delete(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TourStats {
    pub difficulty: String,
    pub tours_count: u64,
    pub num_ratings: f64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Vec<TourStats>>> {
    let spec = QuerySpec::from_pairs(vec![("ratings_average[gte]", "4.5")]);
    let spec = QuerySpec {
        limit: i64::MAX,
        ..spec
    };
    let docs = TOURS.list(state.store.as_ref(), &spec, &[]).await?;
    Ok(Json(compute_stats(&docs)))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MonthlyPlanEntry {
    pub month: u8,
    pub month_name: &'static str,
    pub tour_count: u64,
    pub tours: Vec<String>,
}

#[instrument(skip(state))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> ApiResult<Json<Vec<MonthlyPlanEntry>>> {
    let docs = TOURS.list(state.store.as_ref(), &unbounded(), &[]).await?;
    Ok(Json(compute_monthly_plan(&docs, year)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Mi,
    Km,
}

impl Unit {
    fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "mi" => Ok(Self::Mi),
            "km" => Ok(Self::Km),
            _ => Err(ApiError::validation("Unit must be either mi or km")),
        }
    }

    fn earth_radius(self) -> f64 {
        match self {
            Self::Mi => 3958.8,
            Self::Km => 6371.0,
        }
    }
}

#[instrument(skip(state))]
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(f64, String, String)>,
) -> ApiResult<Json<Vec<Document>>> {
    let unit = Unit::parse(&unit)?;
    let (lat, lng) = parse_latlng(&latlng)?;
    if !(distance.is_finite() && distance >= 0.0) {
        return Err(ApiError::validation("Distance must be a non-negative number"));
    }
    let docs = TOURS.list(state.store.as_ref(), &unbounded(), &[]).await?;
    let within = docs
        .into_iter()
        .filter(|doc| match tour_coords(doc) {
            Some((tlat, tlng)) => haversine(lat, lng, tlat, tlng, unit) <= distance,
            None => false,
        })
        .collect();
    Ok(Json(within))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TourDistance {
    pub name: String,
    pub distance: f64,
}

#[instrument(skip(state))]
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult<Json<Vec<TourDistance>>> {
    let unit = Unit::parse(&unit)?;
    let (lat, lng) = parse_latlng(&latlng)?;
    let docs = TOURS.list(state.store.as_ref(), &unbounded(), &[]).await?;
    let mut out: Vec<TourDistance> = docs
        .iter()
        .filter_map(|doc| {
            let (tlat, tlng) = tour_coords(doc)?;
            Some(TourDistance {
                name: doc
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                distance: haversine(lat, lng, tlat, tlng, unit),
            })
        })
        .collect();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(Json(out))
}

fn validate_tour(doc: &Document, require_all: bool) -> ApiResult<()> {
    if require_all {
        for field in REQUIRED_FIELDS {
            if !doc.contains_key(field) {
                return Err(ApiError::validation(format!("Tour must have a {field}")));
            }
        }
    }
    if let Some(name) = doc.get("name") {
        let name = name
            .as_str()
            .ok_or_else(|| ApiError::validation("Tour name must be a string"))?;
        if name.len() < 10 || name.len() > 40 {
            return Err(ApiError::validation(
                "A tour name must have between 10 and 40 characters",
            ));
        }
    }
    if let Some(difficulty) = doc.get("difficulty") {
        let ok = difficulty
            .as_str()
            .is_some_and(|d| DIFFICULTIES.contains(&d));
        if !ok {
            return Err(ApiError::validation(
                "Difficulty level can only be either: easy, medium or difficult",
            ));
        }
    }
    if let (Some(discount), Some(price)) = (
        doc.get("price_discount").and_then(Value::as_f64),
        doc.get("price").and_then(Value::as_f64),
    ) {
        if discount >= price {
            return Err(ApiError::validation(
                "Discount price should be below regular price",
            ));
        }
    }
    Ok(())
}

pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// GeoJSON stores [lng, lat].
fn tour_coords(doc: &Document) -> Option<(f64, f64)> {
    let coords = doc
        .get("start_location")?
        .as_object()?
        .get("coordinates")?
        .as_array()?;
    let lng = coords.first()?.as_f64()?;
    let lat = coords.get(1)?.as_f64()?;
    Some((lat, lng))
}

fn parse_latlng(raw: &str) -> ApiResult<(f64, f64)> {
    let mut parts = raw.split(',');
    let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ApiError::validation(
            "Please provide lat and lng in the format of lat,lng",
        ));
    };
    match (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
        (Ok(lat), Ok(lng)) => Ok((lat, lng)),
        _ => Err(ApiError::validation(
            "Please provide lat and lng in the format of lat,lng",
        )),
    }
}

fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64, unit: Unit) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * unit.earth_radius()
}

fn compute_stats(docs: &[Document]) -> Vec<TourStats> {
    struct Acc {
        count: u64,
        num_ratings: f64,
        sum_rating: f64,
        rated: u64,
        sum_price: f64,
        priced: u64,
        min_price: f64,
        max_price: f64,
    }
    let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
    for doc in docs {
        let difficulty = doc
            .get("difficulty")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_uppercase();
        let acc = groups.entry(difficulty).or_insert(Acc {
            count: 0,
            num_ratings: 0.0,
            sum_rating: 0.0,
            rated: 0,
            sum_price: 0.0,
            priced: 0,
            min_price: f64::INFINITY,
            max_price: f64::NEG_INFINITY,
        });
        acc.count += 1;
        acc.num_ratings += doc
            .get("ratings_quantity")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if let Some(rating) = doc.get("ratings_average").and_then(Value::as_f64) {
            acc.sum_rating += rating;
            acc.rated += 1;
        }
        if let Some(price) = doc.get("price").and_then(Value::as_f64) {
            acc.sum_price += price;
            acc.priced += 1;
            acc.min_price = acc.min_price.min(price);
            acc.max_price = acc.max_price.max(price);
        }
    }
    groups
        .into_iter()
        .map(|(difficulty, acc)| TourStats {
            difficulty,
            tours_count: acc.count,
            num_ratings: acc.num_ratings,
            avg_rating: if acc.rated > 0 {
                acc.sum_rating / acc.rated as f64
            } else {
                0.0
            },
            avg_price: if acc.priced > 0 {
                acc.sum_price / acc.priced as f64
            } else {
                0.0
            },
            min_price: if acc.priced > 0 { acc.min_price } else { 0.0 },
            max_price: if acc.priced > 0 { acc.max_price } else { 0.0 },
        })
        .collect()
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Accepts both `2021-06-19` and full RFC 3339 timestamps.
fn year_and_month(raw: &str) -> Option<(i32, u8)> {
    let year: i32 = raw.get(0..4)?.parse().ok()?;
    if raw.get(4..5)? != "-" {
        return None;
    }
    let month: u8 = raw.get(5..7)?.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

fn compute_monthly_plan(docs: &[Document], year: i32) -> Vec<MonthlyPlanEntry> {
    let mut buckets: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for doc in docs {
        let Some(dates) = doc.get("start_dates").and_then(Value::as_array) else {
            continue;
        };
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for date in dates {
            let Some((y, m)) = date.as_str().and_then(year_and_month) else {
                continue;
            };
            if y == year {
                buckets.entry(m).or_default().push(name.clone());
            }
        }
    }
    buckets
        .into_iter()
        .map(|(month, tours)| MonthlyPlanEntry {
            month,
            month_name: MONTH_NAMES[(month - 1) as usize],
            tour_count: tours.len() as u64,
            tours,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().expect("object literal").clone()
    }

    #[test]
    fn slugify_flattens_names() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  Sea -- Explorer! "), "sea-explorer");
    }

    #[test]
    fn haversine_matches_known_distance() {
        // one degree of longitude at the equator is ~111.19 km
        let km = haversine(0.0, 0.0, 0.0, 1.0, Unit::Km);
        assert!((km - 111.19).abs() < 0.5, "got {km}");
        let mi = haversine(0.0, 0.0, 0.0, 1.0, Unit::Mi);
        assert!(mi < km);
    }

    #[test]
    fn latlng_parsing_is_strict() {
        assert_eq!(parse_latlng("31.09,77.15").unwrap(), (31.09, 77.15));
        assert!(parse_latlng("31.09").is_err());
        assert!(parse_latlng("a,b").is_err());
        assert!(parse_latlng("1,2,3").is_err());
    }

    #[test]
    fn unit_parsing_rejects_unknown_units() {
        assert_eq!(Unit::parse("mi").unwrap(), Unit::Mi);
        assert_eq!(Unit::parse("km").unwrap(), Unit::Km);
        assert!(Unit::parse("furlongs").is_err());
    }

    #[test]
    fn tour_validation_enforces_the_model_rules() {
        let complete = doc(json!({
            "name": "The Forest Hiker",
            "duration": 5,
            "max_group_size": 25,
            "difficulty": "easy",
            "price": 397,
            "summary": "Breathtaking forests",
            "cover": "tour-1-cover.jpg",
        }));
        assert!(validate_tour(&complete, true).is_ok());

        let mut missing = complete.clone();
        missing.remove("price");
        assert!(validate_tour(&missing, true).is_err());
        // partial updates skip the completeness check
        assert!(validate_tour(&missing, false).is_ok());

        let mut bad = complete.clone();
        bad.insert("difficulty".into(), json!("impossible"));
        assert!(validate_tour(&bad, false).is_err());

        let mut short = complete.clone();
        short.insert("name".into(), json!("Too short"));
        assert!(validate_tour(&short, false).is_err());

        let mut discount = complete;
        discount.insert("price_discount".into(), json!(500));
        assert!(validate_tour(&discount, false).is_err());
    }

    #[test]
    fn stats_group_by_difficulty() {
        let docs = vec![
            doc(json!({"difficulty": "easy", "price": 100, "ratings_average": 4.5, "ratings_quantity": 10})),
            doc(json!({"difficulty": "easy", "price": 300, "ratings_average": 5.0, "ratings_quantity": 6})),
            doc(json!({"difficulty": "difficult", "price": 900, "ratings_average": 4.8, "ratings_quantity": 3})),
        ];
        let stats = compute_stats(&docs);
        assert_eq!(stats.len(), 2);
        let easy = stats.iter().find(|s| s.difficulty == "EASY").unwrap();
        assert_eq!(easy.tours_count, 2);
        assert_eq!(easy.num_ratings, 16.0);
        assert!((easy.avg_rating - 4.75).abs() < f64::EPSILON);
        assert_eq!(easy.min_price, 100.0);
        assert_eq!(easy.max_price, 300.0);
        assert_eq!(easy.avg_price, 200.0);
    }

    #[test]
    fn monthly_plan_buckets_by_month_for_the_year() {
        let docs = vec![
            doc(json!({"name": "A", "start_dates": ["2021-06-19", "2021-07-20", "2022-06-19"]})),
            doc(json!({"name": "B", "start_dates": ["2021-06-01T09:00:00Z"]})),
            doc(json!({"name": "C", "start_dates": []})),
        ];
        let plan = compute_monthly_plan(&docs, 2021);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 6);
        assert_eq!(plan[0].month_name, "June");
        assert_eq!(plan[0].tour_count, 2);
        assert_eq!(plan[0].tours, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(plan[1].month, 7);
        assert_eq!(plan[1].tour_count, 1);
    }

    #[test]
    fn year_and_month_accepts_both_date_shapes() {
        assert_eq!(year_and_month("2021-06-19"), Some((2021, 6)));
        assert_eq!(year_and_month("2021-06-01T09:00:00Z"), Some((2021, 6)));
        assert_eq!(year_and_month("junk"), None);
        assert_eq!(year_and_month("2021-13-01"), None);
    }
}
