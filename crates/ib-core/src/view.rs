//! Screen ↔ world coordinate conversion under pan and zoom.
//!
//! The canvas content layer is drawn with `world * scale + offset`,
//! relative to the canvas container's top-left corner (`origin`).

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 3.0;

/// Pan/zoom state of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// On-screen top-left corner of the canvas container.
    pub origin: Point,
    /// Pan translation in screen pixels.
    pub offset: Vec2,
    /// Zoom factor, always within `MIN_SCALE..=MAX_SCALE`.
    pub scale: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            origin: Point::ZERO,
            offset: Vec2::ZERO,
            scale: 1.0,
        }
    }
}

impl ViewState {
    pub fn screen_to_world(&self, screen: Point) -> Point {
        ((screen - self.origin - self.offset) / self.scale).to_point()
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        self.origin + self.offset + world.to_vec2() * self.scale
    }

    /// Convert a screen-space distance into world units.
    pub fn screen_delta_to_world(&self, delta: Vec2) -> Vec2 {
        delta / self.scale
    }

    /// The transform applied to the content layer (container-relative).
    pub fn content_transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.scale)
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
    }

    /// Multiply the zoom by `factor`, keeping the world point under
    /// `screen_point` fixed on screen.
    pub fn zoom_at(&mut self, screen_point: Point, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let anchor = self.screen_to_world(screen_point);
        self.set_scale(self.scale * factor);
        let drifted = self.world_to_screen(anchor);
        self.offset += screen_point - drifted;
    }

    /// Back to 100% with no pan. The container origin is kept.
    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
        self.scale = 1.0;
    }
}
