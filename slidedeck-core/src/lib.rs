use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod cache;
mod config;
mod deck;
mod error;
mod surface;
pub mod tabs;
mod viewport;
pub mod waitlist;

pub use cache::{CacheKey, RenderCache};
pub use config::{DeckConfig, DEFAULT_RESIZE_QUIET};
pub use deck::{
    Deck, DeckKey, DeckPhase, NavDirection, NavigateOutcome, PrerenderOutcome, RenderFailure,
    RenderOutcome, LOAD_ERROR_STATUS,
};
pub use error::{DeckError, PageError};
pub use surface::{ControlVisibility, DeckSurface};
pub use viewport::Viewport;

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub source: String,
    pub page_count: usize,
}

/// Intrinsic page size in document units (points for PDF).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Rasterisation request for one page. Pages are 1-indexed.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page: usize,
    pub viewport: Viewport,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }
}

/// An opened, paginated document. Owned by exactly one deck.
#[async_trait::async_trait]
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    async fn page_size(&self, page: usize) -> Result<PageSize>;

    async fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &str) -> Result<Arc<dyn DocumentBackend>>;
}
