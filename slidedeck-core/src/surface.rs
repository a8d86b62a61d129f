use anyhow::Result;

use crate::RenderImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlVisibility {
    pub previous: bool,
    pub next: bool,
}

impl ControlVisibility {
    pub fn for_page(page: usize, total: usize) -> Self {
        Self {
            previous: page > 1,
            next: page < total,
        }
    }

    pub fn hidden() -> Self {
        Self::default()
    }
}

/// The container a deck draws into: a display surface, previous/next controls,
/// a status line and a loading indicator.
///
/// Methods take `&self` because a pre-render task and the primary render may
/// hold the surface at the same time; implementations use interior mutability.
pub trait DeckSurface: Send + Sync {
    /// Current pixel size of the container.
    fn container_size(&self) -> (u32, u32);

    fn resize_display(&self, width: u32, height: u32);

    fn draw(&self, image: &RenderImage) -> Result<()>;

    fn set_status(&self, text: &str);

    fn set_loading(&self, visible: bool);

    fn set_controls(&self, controls: ControlVisibility);
}
