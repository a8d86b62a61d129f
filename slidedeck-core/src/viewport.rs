use crate::PageSize;

/// Fit-to-container scale and the resulting pixel size of a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Largest scale at which `page` fits both axes of the container, preserving aspect ratio.
    pub fn fit(page: PageSize, container_width: u32, container_height: u32) -> Self {
        if !page.is_valid() {
            return Self {
                scale: 1.0,
                width: 1,
                height: 1,
            };
        }

        let width_ratio = container_width as f32 / page.width;
        let height_ratio = container_height as f32 / page.height;
        let scale = width_ratio.min(height_ratio);

        Self {
            scale,
            width: scaled_dimension(page.width, scale),
            height: scaled_dimension(page.height, scale),
        }
    }
}

fn scaled_dimension(length: f32, scale: f32) -> u32 {
    let scaled = (length * scale).floor();
    if !scaled.is_finite() || scaled < 1.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}
