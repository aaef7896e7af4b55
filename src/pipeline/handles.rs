//! Registry of rendered-page handles
//!
//! Handles stay valid until the whole document is unloaded; there is no
//! per-page release, so a page that is still on screen never loses its
//! raster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use image::{Rgba, RgbaImage};
use serde::Serialize;

use super::decode::{EncodedPage, export_png};

const PLACEHOLDER_SIZE: u32 = 96;

/// Reference to a decoded page raster held by a [`HandleRegistry`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RenderedHandle(pub u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    entries: HashMap<RenderedHandle, Arc<EncodedPage>>,
    failure_placeholder: Option<RenderedHandle>,
}

/// Process-wide cleanup registry, shared by cloning
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, page: EncodedPage) -> RenderedHandle {
        let mut inner = self.lock();
        inner.next_id += 1;
        let handle = RenderedHandle(inner.next_id);
        inner.entries.insert(handle, Arc::new(page));
        handle
    }

    #[must_use]
    pub fn get(&self, handle: RenderedHandle) -> Option<Arc<EncodedPage>> {
        self.lock().entries.get(&handle).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared image shown for failed pages, registered on first use
    pub fn failure_placeholder(&self) -> Option<RenderedHandle> {
        if let Some(handle) = self.lock().failure_placeholder {
            return Some(handle);
        }

        let page = match export_png(&failure_image()) {
            Ok(page) => page,
            Err(e) => {
                log::error!("Failed to build failure placeholder image: {e}");
                return None;
            }
        };

        let mut inner = self.lock();
        // Another clone may have raced us here
        if let Some(handle) = inner.failure_placeholder {
            return Some(handle);
        }
        inner.next_id += 1;
        let handle = RenderedHandle(inner.next_id);
        inner.entries.insert(handle, Arc::new(page));
        inner.failure_placeholder = Some(handle);
        Some(handle)
    }

    /// Drop every handle at once; returns how many were released
    pub fn release_all(&self) -> usize {
        let mut inner = self.lock();
        let released = inner.entries.len();
        inner.entries.clear();
        inner.failure_placeholder = None;
        if released > 0 {
            log::debug!("Released {released} rendered page handle(s)");
        }
        released
    }
}

/// Light grey tile crossed by two red diagonals
fn failure_image() -> RgbaImage {
    RgbaImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        let on_diagonal = x.abs_diff(y) <= 1 || (x + y).abs_diff(PLACEHOLDER_SIZE - 1) <= 1;
        if on_diagonal {
            Rgba([200, 40, 40, 255])
        } else {
            Rgba([230, 230, 230, 255])
        }
    })
}
