use egui::{Pos2, Rect, Vec2};

/// Pan/zoom transform between world (layout) and screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub pan: Vec2,
    pub zoom: f32,
    min_zoom: f32,
    max_zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self { Self::new(0.2, 3.0) }
}

impl Viewport {
    pub fn new(min_zoom: f32, max_zoom: f32) -> Self {
        Self { pan: Vec2::ZERO, zoom: 1.0, min_zoom, max_zoom }
    }

    pub fn to_screen(&self, world: Pos2) -> Pos2 {
        Pos2::new(world.x * self.zoom + self.pan.x, world.y * self.zoom + self.pan.y)
    }

    pub fn to_world(&self, screen: Pos2) -> Pos2 {
        Pos2::new((screen.x - self.pan.x) / self.zoom, (screen.y - self.pan.y) / self.zoom)
    }

    pub fn rect_to_screen(&self, world: Rect) -> Rect {
        Rect::from_min_max(self.to_screen(world.min), self.to_screen(world.max))
    }

    pub fn rect_to_world(&self, screen: Rect) -> Rect {
        Rect::from_min_max(self.to_world(screen.min), self.to_world(screen.max))
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    // Keep the world point under `anchor` fixed while zooming
    pub fn zoom_at(&mut self, anchor: Pos2, factor: f32) {
        let before = self.to_world(anchor);
        self.zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        let after = self.to_screen(before);
        self.pan += anchor - after;
    }

    /// Center `bounds` in `screen`, zooming out if needed but never past 1:1.
    pub fn fit(&mut self, bounds: Rect, screen: Rect) {
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            self.zoom = 1.0;
            self.pan = screen.center() - bounds.center();
            return;
        }
        let margin = 40.0;
        let sx = (screen.width() - margin).max(1.0) / bounds.width();
        let sy = (screen.height() - margin).max(1.0) / bounds.height();
        self.zoom = sx.min(sy).min(1.0).clamp(self.min_zoom, self.max_zoom);
        let c = bounds.center();
        self.pan = screen.center() - Pos2::new(c.x * self.zoom, c.y * self.zoom);
    }

    pub fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.zoom = 1.0;
    }
}
