use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

pub const DEFAULT_COUNT: u32 = 10;
pub const MAX_COUNT: u32 = 20;
pub const DEFAULT_LANGUAGE: &str = "ru";

/// Bound value meaning "no restriction beyond country".
pub const UNRESTRICTED_BOUND: &str = "address";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    #[default]
    Address,
    Fio,
    Email,
    Party,
}

impl SuggestionType {
    pub const ALL: [SuggestionType; 4] = [
        SuggestionType::Address,
        SuggestionType::Fio,
        SuggestionType::Email,
        SuggestionType::Party,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::Address => "address",
            SuggestionType::Fio => "fio",
            SuggestionType::Email => "email",
            SuggestionType::Party => "party",
        }
    }

    /// Matches `raw` against the whitelist, falling back to `Address` for
    /// anything else (missing, empty, `"undefined"`, unknown).
    pub fn resolve(raw: Option<&str>) -> Resolution<SuggestionType> {
        match raw.and_then(|value| Self::ALL.into_iter().find(|kind| kind.as_str() == value)) {
            Some(kind) => Resolution::Valid(kind),
            None => Resolution::Defaulted(SuggestionType::Address),
        }
    }
}

impl fmt::Display for SuggestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of normalizing a lenient input: either accepted as given or
/// replaced with a safe default.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Resolution<T> {
    Valid(T),
    Defaulted(T),
}

impl<T> Resolution<T> {
    pub fn into_inner(self) -> T {
        match self {
            Resolution::Valid(value) | Resolution::Defaulted(value) => value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Resolution::Defaulted(_))
    }
}

/// Decision for a `locations`/`locations_geo` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationFilter {
    Absent,
    Kept(Value),
    Dropped,
}

impl LocationFilter {
    pub fn parse(name: &str, raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return LocationFilter::Absent;
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Array(_)) => LocationFilter::Kept(value),
            Ok(other) => {
                debug!(param = name, kind = json_kind(&other), "dropping non-array location filter");
                LocationFilter::Dropped
            }
            Err(err) => {
                debug!(param = name, error = %err, "dropping malformed location filter");
                LocationFilter::Dropped
            }
        }
    }

    fn into_value(self) -> Option<Value> {
        match self {
            LocationFilter::Kept(value) => Some(value),
            LocationFilter::Absent | LocationFilter::Dropped => None,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Query parameters accepted by `GET /suggest/{type}`. Every field stays a raw
/// string so malformed values are normalized here instead of rejected by the
/// extractor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SuggestParams {
    pub q: Option<String>,
    pub count: Option<String>,
    pub language: Option<String>,
    pub bound: Option<String>,
    pub locations: Option<String>,
    pub locations_geo: Option<String>,
}

impl SuggestParams {
    pub fn query(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Self::default()
        }
    }

    pub fn with_bound(mut self, bound: impl Into<String>) -> Self {
        self.bound = Some(bound.into());
        self
    }

    pub fn with_count(mut self, count: impl Into<String>) -> Self {
        self.count = Some(count.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundValue {
    pub value: String,
}

/// Exact JSON body posted upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPayload {
    pub query: String,
    pub count: u32,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_bound: Option<BoundValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_bound: Option<BoundValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations_geo: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// Empty query: answer with no suggestions and skip the upstream call.
    Empty,
    Payload(UpstreamPayload),
}

/// Returns the bound to restrict on, if any. Only addresses take a bound, and
/// `"address"` itself means no restriction.
pub fn restricting_bound(kind: SuggestionType, bound: Option<&str>) -> Option<&str> {
    if kind != SuggestionType::Address {
        return None;
    }
    bound.filter(|value| !value.is_empty() && *value != UNRESTRICTED_BOUND)
}

pub fn resolve_count(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_COUNT)
        .min(MAX_COUNT)
}

/// Shapes the upstream request body for an already-resolved suggestion type.
pub fn build(kind: SuggestionType, raw_query: &str, params: &SuggestParams) -> BuildOutcome {
    if raw_query.is_empty() {
        return BuildOutcome::Empty;
    }

    let bound = restricting_bound(kind, params.bound.as_deref()).map(|value| BoundValue {
        value: value.to_string(),
    });

    BuildOutcome::Payload(UpstreamPayload {
        query: raw_query.to_string(),
        count: resolve_count(params.count.as_deref()),
        language: params
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        from_bound: bound.clone(),
        to_bound: bound,
        locations: LocationFilter::parse("locations", params.locations.as_deref()).into_value(),
        locations_geo: LocationFilter::parse("locations_geo", params.locations_geo.as_deref())
            .into_value(),
    })
}

/// Resolves the raw path type and builds the payload from the request's `q`.
pub fn build_for_request(
    raw_type: Option<&str>,
    params: &SuggestParams,
) -> (SuggestionType, BuildOutcome) {
    let kind = SuggestionType::resolve(raw_type).into_inner();
    let outcome = build(kind, params.q.as_deref().unwrap_or_default(), params);
    (kind, outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub value: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Suggestion {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            extra: Map::new(),
        }
    }
}

/// Ranked suggestions as returned to the client; `error` is only set on
/// upstream failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SuggestionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failed(marker: impl Into<String>) -> Self {
        Self {
            suggestions: Vec::new(),
            error: Some(marker.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}
