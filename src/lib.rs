//! Field autocomplete backed by an external suggestion service.
//!
//! The server half ([`proxy`], [`web`]) keeps the service credential private
//! and shapes type-specific upstream requests. The client half ([`widget`],
//! [`dropdown`]) is a host-agnostic state machine for one input and its
//! suggestion list.

pub mod dropdown;
pub mod payload;
#[cfg(feature = "web")]
pub mod proxy;
pub mod settings;
#[cfg(feature = "web")]
pub mod web;
pub mod widget;

pub use dropdown::{DropdownController, DropdownPhase, DropdownSurface, HtmlDropdown};
pub use payload::{
    BuildOutcome, Resolution, SuggestParams, Suggestion, SuggestionResult, SuggestionType,
    UpstreamPayload,
};
#[cfg(feature = "web")]
pub use proxy::{ProxyConfig, ProxyReply, SuggestionProxy};
pub use settings::{Credential, FieldConfig, Settings, SettingsError};
pub use widget::{AutocompleteWidget, SuggestTransport, WidgetManager};
