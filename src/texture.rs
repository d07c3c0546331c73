//! GPU texture upload path (out of scope, §1) — an external collaborator
//! the host application implements. The resolver lazily uploads a decoded
//! image the first time it's actually needed for display (§4.6 step 8),
//! then the CPU-side buffer can be freed.

use crate::codec::DecodedImage;

pub trait TextureUploader: Send + Sync {
    type Handle: Clone + Send + Sync;

    fn upload(&self, image: &DecodedImage) -> Self::Handle;
}

/// A no-op uploader for tests: hands back an incrementing id instead of a
/// real GPU handle. Not `cfg(test)`-gated so integration tests (`tests/`)
/// can use it too, the same way `fetcher::MockFetcher` is always available.
pub struct CountingUploader {
    next: std::sync::atomic::AtomicU64,
}

impl Default for CountingUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingUploader {
    pub fn new() -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl TextureUploader for CountingUploader {
    type Handle = u64;

    fn upload(&self, _image: &DecodedImage) -> u64 {
        self.next
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
