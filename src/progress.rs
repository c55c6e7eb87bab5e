//! Progress-callback trait for per-image generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::StoryConfigBuilder::progress_callback`] to receive events
//! as the pipeline illustrates each page. The CLI renders them as a progress
//! bar; the HTTP server relies on tracing instead.
//!
//! # Example
//!
//! ```rust
//! use edgequake_storybook::{GenerationProgressCallback, ImageSlot, StoryConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, slot: ImageSlot, total: usize, _placeholder: bool) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{slot} done ({n}/{total})");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { done: AtomicUsize::new(0) });
//! let config = StoryConfig::builder()
//!     .progress_callback(cb as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::ImageSlot;
use std::sync::Arc;

/// Called by the pipeline as it works through the illustrations.
///
/// Implementations must be `Send + Sync`: image jobs run concurrently, so
/// `on_image_*` may be called from several tasks at once. All methods have
/// default no-op implementations.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once the story text exists.
    ///
    /// # Arguments
    /// * `title`        - generated story title
    /// * `total_images` - illustrations still to produce, the character
    ///   reference included (resumed slots excluded)
    fn on_generation_start(&self, title: &str, total_images: usize) {
        let _ = (title, total_images);
    }

    /// Called before the second pass over failed slots. Each of the
    /// `retrying` slots reports completion or error once more.
    fn on_retry_pass(&self, retrying: usize) {
        let _ = retrying;
    }

    /// Called just before the first image-model request for a slot.
    fn on_image_start(&self, slot: ImageSlot, total_images: usize) {
        let _ = (slot, total_images);
    }

    /// Called when a slot has an image.
    ///
    /// `placeholder` is true when the slot fell back to a placeholder.
    fn on_image_complete(&self, slot: ImageSlot, total_images: usize, placeholder: bool) {
        let _ = (slot, total_images, placeholder);
    }

    /// Called when a slot failed after all attempts.
    fn on_image_error(&self, slot: ImageSlot, total_images: usize, error: &str) {
        let _ = (slot, total_images, error);
    }

    /// Called once after every slot has been attempted.
    ///
    /// # Arguments
    /// * `total_images` - slots attempted in this run
    /// * `generated`    - slots that ended with a real image
    fn on_generation_complete(&self, total_images: usize, generated: usize) {
        let _ = (total_images, generated);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::StoryConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        placeholders: AtomicUsize,
        errors: Mutex<Vec<String>>,
    }

    impl GenerationProgressCallback for TrackingCallback {
        fn on_image_start(&self, _slot: ImageSlot, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_image_complete(&self, _slot: ImageSlot, _total: usize, placeholder: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            if placeholder {
                self.placeholders.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_image_error(&self, slot: ImageSlot, _total: usize, error: &str) {
            self.errors.lock().unwrap().push(format!("{slot}: {error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start("A Title", 3);
        cb.on_image_start(ImageSlot::Cover, 3);
        cb.on_image_complete(ImageSlot::Page(1), 3, false);
        cb.on_image_error(ImageSlot::Page(2), 3, "boom");
        cb.on_retry_pass(1);
        cb.on_generation_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_image_start(ImageSlot::Cover, 2);
        tracker.on_image_complete(ImageSlot::Cover, 2, false);
        tracker.on_image_start(ImageSlot::Page(1), 2);
        tracker.on_image_error(ImageSlot::Page(1), 2, "timeout");
        tracker.on_image_complete(ImageSlot::Page(1), 2, true);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.placeholders.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.lock().unwrap().as_slice(), ["page 1: timeout"]);
    }
}
