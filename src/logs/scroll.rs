/// What the renderer should do with the viewport after new content arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollAction {
    ScrollToBottom { offset: f64 },
    Hold,
}

/// Decides whether new log lines may move the viewport.
///
/// The decision uses the position sampled *before* the content grew: a reader who was
/// pinned to the bottom follows the tail, a reader scrolled into history stays put.
#[derive(Debug, Clone)]
pub struct ScrollArbiter {
    tolerance: f64,
    offset: f64,
    content_height: f64,
    viewport_height: f64,
    pinned: bool,
}

impl ScrollArbiter {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(0.0),
            offset: 0.0,
            content_height: 0.0,
            viewport_height: 0.0,
            pinned: true,
        }
    }

    /// Sample a user or programmatic scroll event.
    pub fn on_scroll(&mut self, offset: f64, content_height: f64, viewport_height: f64) {
        self.content_height = content_height.max(0.0);
        self.viewport_height = viewport_height.max(0.0);
        self.offset = offset.clamp(0.0, self.max_offset());
        self.pinned = self.distance_from_bottom() <= self.tolerance;
    }

    pub fn on_viewport_resized(&mut self, viewport_height: f64) {
        self.viewport_height = viewport_height.max(0.0);
        if self.pinned {
            self.offset = self.max_offset();
        } else {
            self.offset = self.offset.min(self.max_offset());
        }
    }

    pub fn on_content_changed(&mut self, content_height: f64) -> ScrollAction {
        let was_pinned = self.pinned;
        self.content_height = content_height.max(0.0);

        if was_pinned {
            self.offset = self.max_offset();
            ScrollAction::ScrollToBottom {
                offset: self.offset,
            }
        } else {
            // Shrinking content (clear, eviction) can leave the old offset out of range.
            self.offset = self.offset.min(self.max_offset());
            self.pinned = self.distance_from_bottom() <= self.tolerance;
            ScrollAction::Hold
        }
    }

    /// Explicit "jump to latest".
    pub fn scroll_to_bottom(&mut self) -> f64 {
        self.offset = self.max_offset();
        self.pinned = true;
        self.offset
    }

    pub fn is_at_bottom(&self) -> bool {
        self.pinned
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    fn max_offset(&self) -> f64 {
        (self.content_height - self.viewport_height).max(0.0)
    }

    fn distance_from_bottom(&self) -> f64 {
        (self.max_offset() - self.offset).max(0.0)
    }
}
