//! Tab list with ARIA-style selection, keyboard focus movement and hash deep links.
//!
//! The controller owns no page state: callers apply the returned
//! [`TabActivation`] to whatever renders the tabs.

use tracing::debug;

use crate::PageError;

const TAB_ID_PREFIX: &str = "tab-";
const DEFAULT_SECTION: &str = "demo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: String,
    pub panel: String,
    pub selected: bool,
}

impl Tab {
    pub fn new(id: impl Into<String>, panel: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            panel: panel.into(),
            selected: false,
        }
    }

    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }

    /// Section name used in the URL hash: the id without its `tab-` prefix.
    pub fn section(&self) -> &str {
        self.id.strip_prefix(TAB_ID_PREFIX).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabOptions {
    pub reduced_motion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivateOptions {
    pub focus: bool,
    pub update_hash: bool,
}

impl Default for ActivateOptions {
    fn default() -> Self {
        Self {
            focus: true,
            update_hash: true,
        }
    }
}

/// What the host has to do after a tab became selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabActivation {
    pub index: usize,
    pub focus: bool,
    pub animate_panel: bool,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabKey {
    ArrowRight,
    ArrowDown,
    ArrowLeft,
    ArrowUp,
    Home,
    End,
    Enter,
    Space,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabKeyOutcome {
    Focus(usize),
    Activated(Option<TabActivation>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorRoute {
    /// The anchor names a tab section; hash-change handling selects it.
    Tab,
    ScrollTo { id: String, smooth: bool },
    Ignore,
}

#[derive(Debug, Clone)]
pub struct TabList {
    tabs: Vec<Tab>,
    selected: usize,
    options: TabOptions,
}

impl TabList {
    pub fn new(tabs: Vec<Tab>, options: TabOptions) -> Result<Self, PageError> {
        if tabs.is_empty() {
            return Err(PageError::NoTabs);
        }
        let mut list = Self {
            tabs,
            selected: 0,
            options,
        };
        list.ensure_valid_state();
        Ok(list)
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_tab(&self) -> &Tab {
        &self.tabs[self.selected]
    }

    /// Only the selected tab takes part in the tab order.
    pub fn tab_index(&self, index: usize) -> i32 {
        if index == self.selected {
            0
        } else {
            -1
        }
    }

    pub fn is_panel_hidden(&self, panel: &str) -> bool {
        self.selected_tab().panel != panel
    }

    /// Collapses the selection to exactly one tab: the first marked one, else the first.
    pub fn ensure_valid_state(&mut self) {
        self.selected = self.tabs.iter().position(|tab| tab.selected).unwrap_or(0);
        self.sync_flags();
    }

    fn sync_flags(&mut self) {
        let selected = self.selected;
        for (index, tab) in self.tabs.iter_mut().enumerate() {
            tab.selected = index == selected;
        }
    }

    pub fn activate(
        &mut self,
        index: usize,
        options: ActivateOptions,
    ) -> Result<Option<TabActivation>, PageError> {
        if index >= self.tabs.len() {
            return Err(PageError::UnknownTab(index));
        }
        if index == self.selected {
            return Ok(None);
        }

        self.selected = index;
        self.sync_flags();
        let tab = &self.tabs[index];
        debug!(tab = %tab.id, "tab activated");

        Ok(Some(TabActivation {
            index,
            focus: options.focus,
            animate_panel: !self.options.reduced_motion,
            hash: options
                .update_hash
                .then(|| tab.section())
                .filter(|section| !section.is_empty())
                .map(|section| format!("#{section}")),
        }))
    }

    pub fn handle_key(&mut self, focused: usize, key: TabKey) -> Result<TabKeyOutcome, PageError> {
        let len = self.tabs.len();
        if focused >= len {
            return Err(PageError::UnknownTab(focused));
        }

        let next = match key {
            TabKey::ArrowRight | TabKey::ArrowDown => (focused + 1) % len,
            TabKey::ArrowLeft | TabKey::ArrowUp => (focused + len - 1) % len,
            TabKey::Home => 0,
            TabKey::End => len - 1,
            TabKey::Enter | TabKey::Space => {
                let activation = self.activate(focused, ActivateOptions::default())?;
                return Ok(TabKeyOutcome::Activated(activation));
            }
        };
        Ok(TabKeyOutcome::Focus(next))
    }

    pub fn find_section(&self, section: &str) -> Option<usize> {
        let id = format!("{TAB_ID_PREFIX}{section}");
        self.tabs.iter().position(|tab| tab.id == id)
    }

    /// Selects the tab named by a location hash such as `#features`.
    ///
    /// An empty hash means the demo section. Unknown sections leave the
    /// current selection in place.
    pub fn open_from_hash(&mut self, hash: &str) -> Option<TabActivation> {
        let key = hash.strip_prefix('#').unwrap_or(hash).to_lowercase();
        let key = if key.is_empty() {
            DEFAULT_SECTION.to_owned()
        } else {
            key
        };

        match self.find_section(&key) {
            Some(index) => self
                .activate(
                    index,
                    ActivateOptions {
                        focus: false,
                        update_hash: false,
                    },
                )
                .ok()
                .flatten(),
            None => {
                self.ensure_valid_state();
                None
            }
        }
    }

    /// Decides what a click on `href` should do. `exists` reports whether an
    /// element with the given id is on the page.
    pub fn route_anchor<F>(&self, href: &str, exists: F) -> AnchorRoute
    where
        F: Fn(&str) -> bool,
    {
        let Some(id) = href.strip_prefix('#') else {
            return AnchorRoute::Ignore;
        };
        if id.is_empty() {
            return AnchorRoute::Ignore;
        }
        if self.find_section(id).is_some() {
            return AnchorRoute::Tab;
        }
        if !exists(id) {
            return AnchorRoute::Ignore;
        }
        AnchorRoute::ScrollTo {
            id: id.to_owned(),
            smooth: !self.options.reduced_motion,
        }
    }
}
