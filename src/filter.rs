use serde_json::Value;
use thiserror::Error;

use crate::model::{Gender, InsuranceStatus, StudentRecord, Title};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter<T> {
    #[default]
    All,
    Only(T),
    /// A value outside the enum; nothing has it.
    Unknown(String),
}

impl<T: PartialEq> Filter<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Filter::All => true,
            Filter::Only(want) => want == value,
            Filter::Unknown(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterQuery {
    pub title: Filter<Title>,
    pub class_level: Filter<String>,
    pub gender: Filter<Gender>,
    pub insurance: Filter<InsuranceStatus>,
    pub search: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct FilterError {
    pub message: String,
}

impl FilterError {
    fn new(message: impl Into<String>) -> Self {
        FilterError {
            message: message.into(),
        }
    }
}

/// Filtered view in roster order. Filters and search all have to hold.
pub fn apply<'a>(roster: &'a [StudentRecord], query: &RosterQuery) -> Vec<&'a StudentRecord> {
    let term = query.search.trim().to_lowercase();
    roster
        .iter()
        .filter(|s| matches_filters(s, query))
        .filter(|s| term.is_empty() || matches_search(s, &term))
        .collect()
}

fn matches_filters(s: &StudentRecord, q: &RosterQuery) -> bool {
    q.title.admits(&s.title)
        && q.class_level.admits(&s.class_level)
        && q.gender.admits(&s.gender)
        && q.insurance.admits(&s.insurance_status)
}

/// `term` must already be lowercased.
fn matches_search(s: &StudentRecord, term: &str) -> bool {
    s.search_fields()
        .into_iter()
        .any(|v| v.to_lowercase().contains(term))
}

/// Reads one filter slot: missing, null, empty or "all" means no constraint.
/// Any other string is an exact-match value, even one no record can carry.
fn filter_slot<T>(
    filters: &serde_json::Map<String, Value>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Filter<T>, FilterError> {
    match filters.get(key) {
        None | Some(Value::Null) => Ok(Filter::All),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("all") {
                return Ok(Filter::All);
            }
            Ok(parse(t).map_or_else(|| Filter::Unknown(t.to_string()), Filter::Only))
        }
        Some(_) => Err(FilterError::new(format!(
            "filters.{key} must be a string or null"
        ))),
    }
}

pub fn parse_query(params: &Value) -> Result<RosterQuery, FilterError> {
    let search = match params.get("search") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(FilterError::new("search must be a string")),
    };
    let empty = serde_json::Map::new();
    let filters = match params.get("filters") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(FilterError::new("filters must be an object")),
    };
    Ok(RosterQuery {
        title: filter_slot(filters, "title", Title::parse)?,
        class_level: filter_slot(filters, "classLevel", |s| Some(s.to_string()))?,
        gender: filter_slot(filters, "gender", Gender::parse)?,
        insurance: filter_slot(filters, "insurance", |s| {
            [InsuranceStatus::Insured, InsuranceStatus::NotInsured]
                .into_iter()
                .find(|v| v.as_str() == s)
        })?,
        search,
    })
}
