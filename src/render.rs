//! Preview renderers

use std::sync::Mutex;

use crate::types::VideoFrame;

/// Consumer of the processed video stream
pub trait Renderer: Send + Sync {
    fn render(&self, frame: &VideoFrame);
    fn set_mirroring(&self, mirrored: bool);
    fn is_mirroring(&self) -> bool;
}

#[derive(Default)]
struct PreviewState {
    latest: Option<VideoFrame>,
    mirrored: bool,
    rendered: u64,
}

/// Keeps only the most recent frame for a UI layer to pull
#[derive(Default)]
pub struct PreviewRenderer {
    state: Mutex<PreviewState>,
}

impl PreviewRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.state.lock().expect("lock poisoned").latest.clone()
    }

    /// Frames received so far
    pub fn rendered_frames(&self) -> u64 {
        self.state.lock().expect("lock poisoned").rendered
    }
}

impl Renderer for PreviewRenderer {
    fn render(&self, frame: &VideoFrame) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.latest = Some(frame.clone());
        state.rendered += 1;
    }

    fn set_mirroring(&self, mirrored: bool) {
        self.state.lock().expect("lock poisoned").mirrored = mirrored;
    }

    fn is_mirroring(&self) -> bool {
        self.state.lock().expect("lock poisoned").mirrored
    }
}
