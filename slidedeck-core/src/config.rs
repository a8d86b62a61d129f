use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::DeckError;

pub const DEFAULT_RESIZE_QUIET: Duration = Duration::from_millis(120);

/// Per-deck settings, read once when the deck is created.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckConfig {
    pub source: String,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "resize_quiet_ms", default = "default_resize_quiet")]
    pub resize_quiet: Duration,
}

fn default_resize_quiet() -> Duration {
    DEFAULT_RESIZE_QUIET
}

impl DeckConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page: None,
            resize_quiet: DEFAULT_RESIZE_QUIET,
        }
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    /// Builds a config from markup-style attributes (`src`, `page`).
    ///
    /// A missing or unparsable `page` falls back to the first page.
    pub fn from_attributes<'a, I>(attributes: I) -> Result<Self, DeckError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut source = None;
        let mut page = None;
        for (name, value) in attributes {
            match name {
                "src" => source = Some(value.trim().to_owned()),
                "page" => page = value.trim().parse::<usize>().ok().filter(|p| *p > 0),
                _ => {}
            }
        }

        let source = source
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DeckError::Config("missing `src` attribute".into()))?;
        Ok(Self {
            source,
            page,
            resize_quiet: DEFAULT_RESIZE_QUIET,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to decode deck config")?;
        config.validated()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("failed to decode deck config")?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.source.trim().is_empty() {
            anyhow::bail!("deck config has an empty `source`");
        }
        Ok(self)
    }

    /// Reads a `.json` config as JSON and anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deck config {:?}", path))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        };
        parsed.with_context(|| format!("invalid deck config {:?}", path))
    }

    /// Initial page clamped to `1..=total`.
    pub fn initial_page(&self, total: usize) -> usize {
        self.page.unwrap_or(1).clamp(1, total.max(1))
    }
}
