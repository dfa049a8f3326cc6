use crate::payload::{SuggestionType, UNRESTRICTED_BOUND, restricting_bound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_API_URL: &str = "https://suggestions.dadata.ru/suggestions/api/4_1/rs/suggest";

/// Binds one input element (by id) to a suggestion type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub field_id: String,
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub bound: String,
}

impl FieldConfig {
    pub fn new(field_id: impl Into<String>, kind: SuggestionType, bound: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            kind,
            bound: bound.into(),
        }
    }

    pub fn restricting_bound(&self) -> Option<&str> {
        restricting_bound(self.kind, Some(&self.bound))
    }
}

/// Upstream credential. Held server-side only; `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub api_base_url: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: normalize_api_url(Some(api_base_url.into())),
        }
    }

    pub fn authorization(&self) -> String {
        format!("Token {}", self.api_key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    MissingApiKey,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(err) => write!(f, "failed to read settings: {err}"),
            SettingsError::Parse(err) => write!(f, "invalid settings file: {err}"),
            SettingsError::MissingApiKey => write!(f, "an API key is required"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(value: std::io::Error) -> Self {
        SettingsError::Io(value)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(value: serde_json::Error) -> Self {
        SettingsError::Parse(value)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    api_key: Option<String>,
    api_url: Option<String>,
    #[serde(default)]
    fields: Vec<RawField>,
}

#[derive(Debug, Default, Deserialize)]
struct RawField {
    field_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    suggest_type: Option<String>,
    bound: Option<String>,
}

impl RawField {
    fn normalize(self) -> Option<FieldConfig> {
        let field_id = self.field_id.filter(|id| !id.trim().is_empty())?;
        let kind = SuggestionType::resolve(self.kind.or(self.suggest_type).as_deref()).into_inner();
        Some(FieldConfig {
            field_id,
            kind,
            bound: self.bound.unwrap_or_else(|| UNRESTRICTED_BOUND.to_string()),
        })
    }
}

/// Snapshot of the externally managed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_url: String,
    pub fields: Vec<FieldConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            fields: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let raw: RawSettings = serde_json::from_str(text)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        Self {
            api_key: raw.api_key.filter(|key| !key.trim().is_empty()),
            api_url: normalize_api_url(raw.api_url),
            fields: raw.fields.into_iter().filter_map(RawField::normalize).collect(),
        }
    }

    /// Applies command-line or environment overrides on top of the file.
    pub fn with_overrides(mut self, api_key: Option<String>, api_url: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if api_url.is_some() {
            self.api_url = normalize_api_url(api_url);
        }
        self
    }

    pub fn credential(&self) -> Result<Credential, SettingsError> {
        let api_key = self.api_key.clone().ok_or(SettingsError::MissingApiKey)?;
        Ok(Credential {
            api_key,
            api_base_url: self.api_url.clone(),
        })
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|field| field.field_id == field_id)
    }
}

fn normalize_api_url(raw: Option<String>) -> String {
    raw.map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}
