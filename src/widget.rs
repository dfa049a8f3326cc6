use crate::dropdown::{DropdownController, DropdownSurface};
use crate::payload::SuggestionResult;
use crate::settings::FieldConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Shortest trimmed query that triggers a request.
pub const MIN_QUERY_CHARS: usize = 3;
/// Delay between losing focus and closing, so a click on a row still lands.
pub const BLUR_GRACE: Duration = Duration::from_millis(200);
pub const DEFAULT_ENDPOINT: &str = "/suggest";

// Same set `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

#[derive(Debug)]
pub enum TransportError {
    Request(String),
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(msg) => write!(f, "suggest request failed: {msg}"),
            TransportError::Decode(msg) => write!(f, "suggest response unreadable: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Fetches suggestions from the proxy endpoint.
pub trait SuggestTransport {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<SuggestionResult, TransportError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestRequest {
    pub generation: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowDown,
    ArrowUp,
    Enter,
    Other,
}

impl Key {
    pub fn from_name(name: &str) -> Self {
        match name {
            "ArrowDown" => Key::ArrowDown,
            "ArrowUp" => Key::ArrowUp,
            "Enter" => Key::Enter,
            _ => Key::Other,
        }
    }
}

/// Whether the host must suppress the browser's default key handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Handled,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Input,
    Dropdown,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Applied,
    Stale,
    Failed,
}

/// One input bound to one dropdown and one proxy endpoint.
///
/// Requests are tagged with a generation number; a response is applied only
/// if it belongs to the latest request, so a slow stale answer never replaces
/// a fresher one.
#[derive(Debug)]
pub struct AutocompleteWidget<S> {
    field: FieldConfig,
    base_url: String,
    value: String,
    dropdown: DropdownController<S>,
    generation: u64,
}

impl<S: DropdownSurface> AutocompleteWidget<S> {
    pub fn new(field: FieldConfig, endpoint: &str, surface: S) -> Self {
        let base_url = endpoint_url(endpoint, &field);
        Self {
            field,
            base_url,
            value: String::new(),
            dropdown: DropdownController::new(surface),
            generation: 0,
        }
    }

    pub fn field(&self) -> &FieldConfig {
        &self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn dropdown(&self) -> &DropdownController<S> {
        &self.dropdown
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handles an `input` event. Returns the request to issue, if any.
    pub fn on_input(&mut self, value: &str) -> Option<SuggestRequest> {
        self.value = value.to_string();
        self.generation += 1;
        let query = value.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            self.dropdown.close();
            return None;
        }
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        Some(SuggestRequest {
            generation: self.generation,
            url: format!("{}{}q={}", self.base_url, separator, encode_component(query)),
        })
    }

    pub fn on_response(
        &mut self,
        generation: u64,
        result: Result<SuggestionResult, TransportError>,
    ) -> ResponseOutcome {
        if generation != self.generation {
            debug!(
                field = %self.field.field_id,
                generation,
                latest = self.generation,
                "discarding stale suggestions"
            );
            return ResponseOutcome::Stale;
        }
        match result {
            Ok(result) => {
                self.dropdown.show(result.suggestions);
                ResponseOutcome::Applied
            }
            Err(err) => {
                error!(field = %self.field.field_id, error = %err, "suggestion request failed");
                ResponseOutcome::Failed
            }
        }
    }

    pub fn on_keydown(&mut self, key: Key) -> KeyOutcome {
        if !self.dropdown.is_open() {
            return KeyOutcome::Default;
        }
        match key {
            Key::ArrowDown => {
                self.dropdown.move_down();
                KeyOutcome::Handled
            }
            Key::ArrowUp => {
                self.dropdown.move_up();
                KeyOutcome::Handled
            }
            Key::Enter => match self.dropdown.commit_active() {
                Some(value) => {
                    self.commit(value);
                    KeyOutcome::Handled
                }
                None => KeyOutcome::Default,
            },
            Key::Other => KeyOutcome::Default,
        }
    }

    pub fn on_item_click(&mut self, index: usize) {
        if let Some(value) = self.dropdown.select(index) {
            self.commit(value);
        }
    }

    pub fn on_document_click(&mut self, target: ClickTarget) {
        if target == ClickTarget::Outside {
            self.dismiss();
        }
    }

    /// Returns how long the host should wait before calling
    /// [`Self::on_blur_elapsed`].
    pub fn on_blur(&self) -> Duration {
        BLUR_GRACE
    }

    pub fn on_blur_elapsed(&mut self) {
        self.dismiss();
    }

    pub fn close(&mut self) {
        self.dismiss();
    }

    /// Runs a full input cycle against a transport: issue, await, apply.
    pub async fn type_text<T: SuggestTransport>(
        &mut self,
        transport: &T,
        value: &str,
    ) -> Option<ResponseOutcome> {
        let request = self.on_input(value)?;
        let result = transport.fetch(&request.url).await;
        Some(self.on_response(request.generation, result))
    }

    /// Closes the dropdown and retires any request still in flight, so a late
    /// response cannot reopen it on an input that lost focus.
    fn dismiss(&mut self) {
        self.dropdown.close();
        self.generation += 1;
    }

    fn commit(&mut self, value: String) {
        self.value = value;
        // Pending responses belong to the text that was just replaced.
        self.generation += 1;
    }
}

fn endpoint_url(endpoint: &str, field: &FieldConfig) -> String {
    let mut url = format!("{}/{}", endpoint.trim_end_matches('/'), field.kind);
    if let Some(bound) = field.restricting_bound() {
        url.push_str("?bound=");
        url.push_str(&encode_component(bound));
    }
    url
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Bound,
    AlreadyBound,
}

/// Registry of widgets keyed by input id. Attaching twice is a lookup, not a
/// second binding.
#[derive(Debug)]
pub struct WidgetManager<S> {
    endpoint: String,
    widgets: HashMap<String, AutocompleteWidget<S>>,
}

impl<S: DropdownSurface> WidgetManager<S> {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            widgets: HashMap::new(),
        }
    }

    pub fn attach(&mut self, field: FieldConfig, surface: S) -> Attach {
        match self.widgets.entry(field.field_id.clone()) {
            Entry::Occupied(_) => Attach::AlreadyBound,
            Entry::Vacant(slot) => {
                slot.insert(AutocompleteWidget::new(field, &self.endpoint, surface));
                Attach::Bound
            }
        }
    }

    /// Binds every configured field whose element exists. `surface_for`
    /// returns `None` when the page has no element with that id.
    pub fn attach_all<'a, I, F>(&mut self, fields: I, mut surface_for: F) -> usize
    where
        I: IntoIterator<Item = &'a FieldConfig>,
        F: FnMut(&FieldConfig) -> Option<S>,
    {
        let mut bound = 0;
        for field in fields {
            if self.widgets.contains_key(&field.field_id) {
                continue;
            }
            if let Some(surface) = surface_for(field) {
                self.attach(field.clone(), surface);
                bound += 1;
            }
        }
        bound
    }

    pub fn is_bound(&self, field_id: &str) -> bool {
        self.widgets.contains_key(field_id)
    }

    pub fn get(&self, field_id: &str) -> Option<&AutocompleteWidget<S>> {
        self.widgets.get(field_id)
    }

    pub fn get_mut(&mut self, field_id: &str) -> Option<&mut AutocompleteWidget<S>> {
        self.widgets.get_mut(field_id)
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    pub fn detach(&mut self, field_id: &str) -> Option<AutocompleteWidget<S>> {
        let mut widget = self.widgets.remove(field_id)?;
        widget.close();
        Some(widget)
    }

    pub fn teardown(&mut self) {
        for (_, mut widget) in self.widgets.drain() {
            widget.close();
        }
    }
}

/// Fetches from a running proxy over HTTP.
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct HttpSuggestTransport {
    client: reqwest::Client,
    origin: String,
}

#[cfg(feature = "web")]
impl HttpSuggestTransport {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(feature = "web")]
impl SuggestTransport for HttpSuggestTransport {
    async fn fetch(&self, url: &str) -> Result<SuggestionResult, TransportError> {
        let response = self
            .client
            .get(format!("{}{}", self.origin, url))
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        // Failure replies still carry a suggestion list, so the body is read
        // regardless of status.
        response
            .json::<SuggestionResult>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dropdown::{DropdownPhase, HtmlDropdown};
    use crate::payload::{Suggestion, SuggestionType};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        replies: HashMap<String, SuggestionResult>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn reply(mut self, url: &str, values: &[&str]) -> Self {
            let result = SuggestionResult {
                suggestions: values.iter().map(|v| Suggestion::new(*v)).collect(),
                error: None,
            };
            self.replies.insert(url.to_string(), result);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl SuggestTransport for ScriptedTransport {
        async fn fetch(&self, url: &str) -> Result<SuggestionResult, TransportError> {
            self.calls.lock().push(url.to_string());
            self.replies
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Request(format!("no route for {url}")))
        }
    }

    fn suggestions(values: &[&str]) -> SuggestionResult {
        SuggestionResult {
            suggestions: values.iter().map(|v| Suggestion::new(*v)).collect(),
            error: None,
        }
    }

    fn address_widget(bound: &str) -> AutocompleteWidget<HtmlDropdown> {
        AutocompleteWidget::new(
            FieldConfig::new("edit-street", SuggestionType::Address, bound),
            DEFAULT_ENDPOINT,
            HtmlDropdown::new("edit-street"),
        )
    }

    #[test]
    fn builds_endpoint_urls() {
        let house = address_widget("house");
        let request = house.base_url.clone();
        assert_eq!(request, "/suggest/address?bound=house");
        assert_eq!(address_widget("address").base_url, "/suggest/address");

        let person = AutocompleteWidget::new(
            FieldConfig::new("edit-name", SuggestionType::Fio, "house"),
            "/suggest/",
            HtmlDropdown::new("edit-name"),
        );
        assert_eq!(person.base_url, "/suggest/fio");
    }

    #[test]
    fn short_queries_issue_nothing_and_close() {
        let mut widget = address_widget("address");
        let request = widget.on_input("Arbat").unwrap();
        widget.on_response(request.generation, Ok(suggestions(&["Arbat st"])));
        assert!(widget.dropdown().is_open());

        assert_eq!(widget.on_input("  ab  "), None);
        assert_eq!(widget.dropdown().phase(), DropdownPhase::Closed);
        assert_eq!(widget.on_input("аб"), None);
    }

    #[test]
    fn query_is_trimmed_and_encoded() {
        let mut widget = address_widget("house");
        let request = widget.on_input("  Red Sq&1 ").unwrap();
        assert_eq!(request.url, "/suggest/address?bound=house&q=Red%20Sq%261");
        let mut widget = address_widget("address");
        let request = widget.on_input("Тверская").unwrap();
        assert!(request.url.starts_with("/suggest/address?q=%D0%A2"));
    }

    #[test]
    fn stale_responses_are_discarded() {
        let mut widget = address_widget("address");
        let slow = widget.on_input("Tver").unwrap();
        let fresh = widget.on_input("Tverskaya").unwrap();
        assert!(fresh.generation > slow.generation);

        assert_eq!(
            widget.on_response(fresh.generation, Ok(suggestions(&["Tverskaya st, 1"]))),
            ResponseOutcome::Applied
        );
        assert_eq!(
            widget.on_response(slow.generation, Ok(suggestions(&["Tver", "Tver region"]))),
            ResponseOutcome::Stale
        );
        assert_eq!(widget.dropdown().items().len(), 1);
        assert_eq!(widget.dropdown().items()[0].value, "Tverskaya st, 1");
    }

    #[test]
    fn late_response_cannot_reopen_after_short_input() {
        let mut widget = address_widget("address");
        let pending = widget.on_input("Tver").unwrap();
        widget.on_input("Tv");
        assert_eq!(
            widget.on_response(pending.generation, Ok(suggestions(&["Tver"]))),
            ResponseOutcome::Stale
        );
        assert!(!widget.dropdown().is_open());
    }

    #[test]
    fn network_error_keeps_prior_state() {
        let mut widget = address_widget("address");
        let first = widget.on_input("Arbat").unwrap();
        widget.on_response(first.generation, Ok(suggestions(&["Arbat st"])));
        let second = widget.on_input("Arbat 1").unwrap();
        let outcome = widget.on_response(
            second.generation,
            Err(TransportError::Request("connection reset".into())),
        );
        assert_eq!(outcome, ResponseOutcome::Failed);
        assert!(widget.dropdown().is_open());
        assert_eq!(widget.dropdown().items()[0].value, "Arbat st");
    }

    #[test]
    fn keys_pass_through_when_closed() {
        let mut widget = address_widget("address");
        assert_eq!(widget.on_keydown(Key::ArrowDown), KeyOutcome::Default);
        assert_eq!(widget.on_keydown(Key::Enter), KeyOutcome::Default);
        assert_eq!(Key::from_name("Escape"), Key::Other);
    }

    #[test]
    fn enter_without_highlight_keeps_default() {
        let mut widget = address_widget("address");
        let request = widget.on_input("Arbat").unwrap();
        widget.on_response(request.generation, Ok(suggestions(&["Arbat st"])));
        assert_eq!(widget.on_keydown(Key::Enter), KeyOutcome::Default);
        assert!(widget.dropdown().is_open());
        assert_eq!(widget.value(), "Arbat");
    }

    #[test]
    fn click_commits_item() {
        let mut widget = address_widget("address");
        let request = widget.on_input("Arbat").unwrap();
        widget.on_response(request.generation, Ok(suggestions(&["Arbat st", "Arbat lane"])));
        widget.on_document_click(ClickTarget::Dropdown);
        assert!(widget.dropdown().is_open());
        widget.on_item_click(1);
        assert_eq!(widget.value(), "Arbat lane");
        assert!(!widget.dropdown().is_open());
    }

    #[test]
    fn outside_click_and_blur_close() {
        let mut widget = address_widget("address");
        let request = widget.on_input("Arbat").unwrap();
        widget.on_response(request.generation, Ok(suggestions(&["Arbat st"])));
        widget.on_document_click(ClickTarget::Input);
        assert!(widget.dropdown().is_open());
        widget.on_document_click(ClickTarget::Outside);
        assert!(!widget.dropdown().is_open());

        let request = widget.on_input("Arbat").unwrap();
        widget.on_response(request.generation, Ok(suggestions(&["Arbat st"])));
        assert_eq!(widget.on_blur(), Duration::from_millis(200));
        assert!(widget.dropdown().is_open());
        widget.on_blur_elapsed();
        assert!(!widget.dropdown().is_open());
    }

    #[test]
    fn in_flight_response_cannot_reopen_after_blur() {
        let mut widget = address_widget("address");
        let pending = widget.on_input("Arbat").unwrap();
        widget.on_blur_elapsed();
        assert_eq!(
            widget.on_response(pending.generation, Ok(suggestions(&["Arbat st"]))),
            ResponseOutcome::Stale
        );
        assert!(!widget.dropdown().is_open());
        assert_eq!(widget.dropdown().surface().mounts(), 0);
    }

    #[test]
    fn in_flight_response_cannot_reopen_after_outside_click() {
        let mut widget = address_widget("address");
        let pending = widget.on_input("Arbat").unwrap();
        widget.on_document_click(ClickTarget::Input);
        let kept = widget.generation();
        assert_eq!(kept, pending.generation);

        widget.on_document_click(ClickTarget::Outside);
        assert_eq!(
            widget.on_response(pending.generation, Ok(suggestions(&["Arbat st"]))),
            ResponseOutcome::Stale
        );
        assert!(!widget.dropdown().is_open());

        let fresh = widget.on_input("Arbat").unwrap();
        assert_eq!(
            widget.on_response(fresh.generation, Ok(suggestions(&["Arbat st"]))),
            ResponseOutcome::Applied
        );
        assert!(widget.dropdown().is_open());
    }

    #[tokio::test]
    async fn red_square_scenario() {
        let transport = ScriptedTransport::default().reply(
            "/suggest/address?bound=house&q=Red%20Sq",
            &["Red Sq, 1", "Red Sq, 2", "Red Sq, 3"],
        );
        let mut widget = address_widget("house");

        assert_eq!(widget.type_text(&transport, "Re").await, None);
        assert!(transport.calls().is_empty());

        let outcome = widget.type_text(&transport, "Red Sq").await;
        assert_eq!(outcome, Some(ResponseOutcome::Applied));
        assert_eq!(widget.dropdown().items().len(), 3);

        // Highlight starts on nothing, so two presses land on the second row.
        assert_eq!(widget.on_keydown(Key::ArrowDown), KeyOutcome::Handled);
        assert_eq!(widget.on_keydown(Key::ArrowDown), KeyOutcome::Handled);
        assert_eq!(widget.dropdown().active_index(), Some(1));
        assert_eq!(widget.dropdown().surface().scrolled_to(), Some(1));
        assert_eq!(widget.on_keydown(Key::Enter), KeyOutcome::Handled);
        assert_eq!(widget.value(), "Red Sq, 2");
        assert!(!widget.dropdown().is_open());
    }

    #[tokio::test]
    async fn failure_reply_closes_dropdown() {
        let mut transport = ScriptedTransport::default().reply("/suggest/address?q=Arbat", &["Arbat st"]);
        transport.replies.insert(
            "/suggest/address?q=Arbat%201".to_string(),
            SuggestionResult::failed("request_failed"),
        );
        let mut widget = address_widget("address");
        widget.type_text(&transport, "Arbat").await;
        assert!(widget.dropdown().is_open());
        let outcome = widget.type_text(&transport, "Arbat 1").await;
        assert_eq!(outcome, Some(ResponseOutcome::Applied));
        assert!(!widget.dropdown().is_open());
    }

    #[test]
    fn manager_attaches_once_per_field() {
        let fields = vec![
            FieldConfig::new("edit-city", SuggestionType::Address, "city"),
            FieldConfig::new("edit-name", SuggestionType::Fio, "address"),
            FieldConfig::new("edit-missing", SuggestionType::Email, "address"),
        ];
        let mut manager: WidgetManager<HtmlDropdown> = WidgetManager::new(DEFAULT_ENDPOINT);
        let present = |field: &FieldConfig| {
            (field.field_id != "edit-missing").then(|| HtmlDropdown::new(field.field_id.clone()))
        };
        assert_eq!(manager.attach_all(&fields, present), 2);
        assert_eq!(manager.attach_all(&fields, present), 0);
        assert_eq!(
            manager.attach(fields[0].clone(), HtmlDropdown::new("edit-city")),
            Attach::AlreadyBound
        );
        assert_eq!(manager.len(), 2);
        assert!(!manager.is_bound("edit-missing"));
    }

    #[test]
    fn widgets_are_independent() {
        let mut manager: WidgetManager<HtmlDropdown> = WidgetManager::new(DEFAULT_ENDPOINT);
        manager.attach(
            FieldConfig::new("from", SuggestionType::Address, "city"),
            HtmlDropdown::new("from"),
        );
        manager.attach(
            FieldConfig::new("to", SuggestionType::Address, "city"),
            HtmlDropdown::new("to"),
        );
        let from = manager.get_mut("from").unwrap();
        let request = from.on_input("Moscow").unwrap();
        from.on_response(request.generation, Ok(suggestions(&["Moscow"])));
        assert!(manager.get("from").unwrap().dropdown().is_open());
        assert!(!manager.get("to").unwrap().dropdown().is_open());

        let detached = manager.detach("from").unwrap();
        assert!(!detached.dropdown().is_open());
        manager.teardown();
        assert!(manager.is_empty());
    }
}
