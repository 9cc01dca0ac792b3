//! Rendering collaborator
//!
//! Room-core never touches pixels or media elements. Attaching subscribed
//! media to a surface, detaching it again and drawing pointer marks on the
//! shared canvas are delegated to a [`Renderer`] supplied by the host.

use crate::pointer::Color;
use crate::types::{Surface, TrackId};

/// Presentation side effects requested by the registries
///
/// Calls are made from the coordinator's event processing and from data
/// track handlers; implementations should return quickly.
pub trait Renderer: Send + Sync {
    /// Show a subscribed audio/video track on `surface`
    fn attach(&self, track_id: &TrackId, surface: &Surface);

    /// Remove a previously attached track
    fn detach(&self, track_id: &TrackId);

    /// Draw one pointer mark
    fn draw_mark(&self, surface: &Surface, color: Color, x: f64, y: f64);
}

/// Renderer that discards everything, for headless hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn attach(&self, _track_id: &TrackId, _surface: &Surface) {}

    fn detach(&self, _track_id: &TrackId) {}

    fn draw_mark(&self, _surface: &Surface, _color: Color, _x: f64, _y: f64) {}
}

/// Recording renderer for tests, here and in dependent crates
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum RenderCall {
        Attach(TrackId, Surface),
        Detach(TrackId),
        Mark(Surface, Color, f64, f64),
    }

    /// Renderer that remembers every call
    #[derive(Debug, Default)]
    pub struct RecordingRenderer {
        calls: Mutex<Vec<RenderCall>>,
    }

    impl RecordingRenderer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn calls(&self) -> Vec<RenderCall> {
            self.calls.lock().clone()
        }

        pub fn marks(&self) -> Vec<RenderCall> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, RenderCall::Mark(..)))
                .collect()
        }
    }

    impl Renderer for RecordingRenderer {
        fn attach(&self, track_id: &TrackId, surface: &Surface) {
            self.calls
                .lock()
                .push(RenderCall::Attach(track_id.clone(), surface.clone()));
        }

        fn detach(&self, track_id: &TrackId) {
            self.calls.lock().push(RenderCall::Detach(track_id.clone()));
        }

        fn draw_mark(&self, surface: &Surface, color: Color, x: f64, y: f64) {
            self.calls
                .lock()
                .push(RenderCall::Mark(surface.clone(), color, x, y));
        }
    }
}
