use crate::payload::Suggestion;
use askama::Template;
use tracing::warn;

pub const DROPDOWN_CLASS: &str = "suggest-dropdown";
pub const ITEM_CLASS: &str = "suggest-dropdown-item";

/// One row as it should be drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedItem<'a> {
    pub index: usize,
    pub value: &'a str,
    pub active: bool,
}

/// The host-side element that displays the list, appended next to the input.
pub trait DropdownSurface {
    fn mount(&mut self);
    fn render(&mut self, items: &[RenderedItem<'_>]);
    /// Brings the row into view without scrolling the page.
    fn scroll_into_view(&mut self, index: usize);
    fn unmount(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropdownPhase {
    Closed,
    Open,
}

/// Suggestion list state for a single input. `active` is `None` when nothing
/// is highlighted; the surface is mounted exactly while there are items.
#[derive(Debug)]
pub struct DropdownController<S> {
    surface: S,
    items: Vec<Suggestion>,
    active: Option<usize>,
    mounted: bool,
}

impl<S: DropdownSurface> DropdownController<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            items: Vec::new(),
            active: None,
            mounted: false,
        }
    }

    pub fn phase(&self) -> DropdownPhase {
        if self.mounted {
            DropdownPhase::Open
        } else {
            DropdownPhase::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.mounted
    }

    pub fn items(&self) -> &[Suggestion] {
        &self.items
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Replaces the list with a fresh result set. An empty set closes.
    pub fn show(&mut self, items: Vec<Suggestion>) {
        if items.is_empty() {
            self.close();
            return;
        }
        if !self.mounted {
            self.surface.mount();
            self.mounted = true;
        }
        self.items = items;
        self.active = None;
        self.redraw();
    }

    pub fn close(&mut self) {
        if self.mounted {
            self.surface.unmount();
            self.mounted = false;
        }
        self.items.clear();
        self.active = None;
    }

    /// Returns `false` when closed, so the caller keeps default key behavior.
    pub fn move_down(&mut self) -> bool {
        if !self.mounted {
            return false;
        }
        let last = self.items.len() - 1;
        self.active = Some(match self.active {
            None => 0,
            Some(index) => (index + 1).min(last),
        });
        self.redraw();
        true
    }

    pub fn move_up(&mut self) -> bool {
        if !self.mounted {
            return false;
        }
        self.active = self.active.map(|index| index.saturating_sub(1));
        self.redraw();
        true
    }

    /// Takes the highlighted value and closes, or does nothing without one.
    pub fn commit_active(&mut self) -> Option<String> {
        let index = self.active.filter(|_| self.mounted)?;
        self.select(index)
    }

    pub fn select(&mut self, index: usize) -> Option<String> {
        if !self.mounted {
            return None;
        }
        let value = self.items.get(index)?.value.clone();
        self.close();
        Some(value)
    }

    fn redraw(&mut self) {
        let rows: Vec<RenderedItem<'_>> = self
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| RenderedItem {
                index,
                value: item.value.as_str(),
                active: self.active == Some(index),
            })
            .collect();
        self.surface.render(&rows);
        if let Some(index) = self.active {
            self.surface.scroll_into_view(index);
        }
    }
}

#[derive(Template)]
#[template(
    source = r#"<ul class="{{ list_class }}" data-field="{{ field_id }}">
{%- for item in items %}
  <li class="{{ item_class }}{% if item.active %} active{% endif %}" data-index="{{ item.index }}">{{ item.value }}</li>
{%- endfor %}
</ul>"#,
    ext = "html"
)]
struct DropdownTemplate<'a> {
    list_class: &'a str,
    item_class: &'a str,
    field_id: &'a str,
    items: &'a [RenderedItem<'a>],
}

/// Markup-backed surface: keeps the rendered `<ul>` for the host to insert
/// into the input's parent container.
#[derive(Debug, Clone, Default)]
pub struct HtmlDropdown {
    field_id: String,
    html: Option<String>,
    scrolled_to: Option<usize>,
    mounts: usize,
}

impl HtmlDropdown {
    pub fn new(field_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            ..Self::default()
        }
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    pub fn scrolled_to(&self) -> Option<usize> {
        self.scrolled_to
    }

    /// Number of times the element has been created.
    pub fn mounts(&self) -> usize {
        self.mounts
    }
}

impl DropdownSurface for HtmlDropdown {
    fn mount(&mut self) {
        self.mounts += 1;
        self.html = Some(String::new());
        self.scrolled_to = None;
    }

    fn render(&mut self, items: &[RenderedItem<'_>]) {
        let template = DropdownTemplate {
            list_class: DROPDOWN_CLASS,
            item_class: ITEM_CLASS,
            field_id: &self.field_id,
            items,
        };
        let html = template.render().unwrap_or_else(|err| {
            warn!(field = %self.field_id, error = %err, "failed to render dropdown markup");
            String::new()
        });
        self.html = Some(html);
    }

    fn scroll_into_view(&mut self, index: usize) {
        self.scrolled_to = Some(index);
    }

    fn unmount(&mut self) {
        self.html = None;
        self.scrolled_to = None;
    }
}
