use std::sync::Arc;

use parking_lot::Mutex;

use crate::{RenderImage, Viewport};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub page: usize,
    pub width: u32,
    pub height: u32,
}

impl CacheKey {
    pub fn new(page: usize, viewport: &Viewport) -> Self {
        Self {
            page,
            width: viewport.width,
            height: viewport.height,
        }
    }
}

struct CacheEntry {
    key: CacheKey,
    image: Arc<RenderImage>,
}

/// Holds at most one rendered page. Every insert evicts whatever was there.
///
/// The primary render and a neighbour pre-render may both insert; the last
/// insert wins.
#[derive(Default)]
pub struct RenderCache {
    slot: Mutex<Option<CacheEntry>>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<RenderImage>> {
        self.slot
            .lock()
            .as_ref()
            .filter(|entry| entry.key == *key)
            .map(|entry| Arc::clone(&entry.image))
    }

    pub fn insert(&self, key: CacheKey, image: Arc<RenderImage>) {
        let mut slot = self.slot.lock();
        *slot = Some(CacheEntry { key, image });
    }

    pub fn key(&self) -> Option<CacheKey> {
        self.slot.lock().as_ref().map(|entry| entry.key)
    }
}
