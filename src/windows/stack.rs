use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::WindowSettings;

use super::geometry::{Geometry, Point, Size};
use super::gesture::{hit_region, Gesture, Region};

pub type WindowId = String;

const CASCADE_STEP: i32 = 32;
const DEFAULT_SIZE: Size = Size::new(640, 400);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WindowKind {
    Terminal,
    LogViewer,
    Metrics,
    ScanList,
}

impl WindowKind {
    pub fn id(&self) -> &'static str {
        match self {
            WindowKind::Terminal => "terminal",
            WindowKind::LogViewer => "log-viewer",
            WindowKind::Metrics => "metrics",
            WindowKind::ScanList => "scan-list",
        }
    }

    pub fn default_geometry(&self) -> Geometry {
        match self {
            WindowKind::Terminal => Geometry::new(40, 40, 720, 420),
            WindowKind::LogViewer => Geometry::new(120, 80, 900, 480),
            WindowKind::Metrics => Geometry::new(200, 120, 560, 360),
            WindowKind::ScanList => Geometry::new(280, 160, 480, 400),
        }
    }

    /// Header plus a few lines of content.
    pub fn min_size(&self) -> Size {
        match self {
            WindowKind::Terminal => Size::new(320, 120),
            WindowKind::LogViewer => Size::new(360, 120),
            WindowKind::Metrics => Size::new(280, 160),
            WindowKind::ScanList => Size::new(260, 100),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEntry {
    pub id: WindowId,
    pub z_order: u64,
    pub geometry: Geometry,
    pub min_size: Size,
    pub gesture: Option<Gesture>,
}

/// Stacking order and geometry for the open floating panels.
///
/// z-orders of open windows are always distinct. Raising assigns one more than the current
/// maximum, and once that would pass the ceiling the whole stack is compacted to 0..n-1.
#[derive(Debug)]
pub struct WindowStack {
    windows: HashMap<WindowId, WindowEntry>,
    viewport: Size,
    z_ceiling: u64,
    header_height: i32,
    resize_handle: i32,
    captured: Option<WindowId>,
}

impl WindowStack {
    pub fn new(settings: &WindowSettings) -> Self {
        Self {
            windows: HashMap::new(),
            viewport: Size::new(settings.viewport_width, settings.viewport_height),
            z_ceiling: settings.z_ceiling.clamp(1, u64::MAX - 1),
            header_height: settings.header_height,
            resize_handle: settings.resize_handle,
            captured: None,
        }
    }

    pub fn open_kind(&mut self, kind: WindowKind) -> &WindowEntry {
        self.open(kind.id(), kind.default_geometry(), kind.min_size())
    }

    /// Open a window, or raise it if it is already open.
    pub fn open(&mut self, id: &str, geometry: Geometry, min_size: Size) -> &WindowEntry {
        if self.windows.contains_key(id) {
            self.bring_to_front(id);
        } else {
            self.register(id, geometry, min_size);
        }
        &self.windows[id]
    }

    /// Raise `id` above every other open window, registering it first if unknown.
    /// Raising the frontmost window is a no-op.
    pub fn bring_to_front(&mut self, id: &str) -> u64 {
        let Some(current) = self.windows.get(id).map(|w| w.z_order) else {
            let offset = CASCADE_STEP * self.windows.len() as i32;
            let geometry = Geometry {
                position: Point::new(40 + offset, 40 + offset),
                size: DEFAULT_SIZE,
            };
            return self.register(id, geometry, Size::new(200, self.header_height + 24));
        };

        match self.max_z_excluding(id) {
            Some(top) if current <= top => self.raise(id, top),
            _ => current,
        }
    }

    pub fn close(&mut self, id: &str) -> bool {
        if self.captured.as_deref() == Some(id) {
            self.captured = None;
        }
        self.windows.remove(id).is_some()
    }

    pub fn reset(&mut self) {
        self.windows.clear();
        self.captured = None;
    }

    pub fn get(&self, id: &str) -> Option<&WindowEntry> {
        self.windows.get(id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Render order: back to front.
    pub fn back_to_front(&self) -> Vec<&WindowEntry> {
        let mut ordered: Vec<&WindowEntry> = self.windows.values().collect();
        ordered.sort_by_key(|w| w.z_order);
        ordered
    }

    pub fn frontmost(&self) -> Option<&WindowEntry> {
        self.windows.values().max_by_key(|w| w.z_order)
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    /// Re-clamp every window after the host surface changed size.
    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
        for window in self.windows.values_mut() {
            window.geometry.clamp_position(viewport);
            window.geometry.clamp_size(viewport, window.min_size);
        }
    }

    pub fn set_min_size(&mut self, id: &str, min_size: Size) {
        if let Some(window) = self.windows.get_mut(id) {
            window.min_size = min_size;
            window.geometry.clamp_size(self.viewport, min_size);
        }
    }

    /// Route a pointer-down to the topmost window under `point`: raise it and start a
    /// drag on its header or a resize on its handle.
    pub fn pointer_down(&mut self, point: Point) -> Option<WindowId> {
        let (id, region) = self
            .back_to_front()
            .into_iter()
            .rev()
            .find_map(|w| {
                hit_region(&w.geometry, point, self.header_height, self.resize_handle)
                    .map(|region| (w.id.clone(), region))
            })?;

        self.bring_to_front(&id);
        match region {
            Region::Header => self.begin_drag(&id, point),
            Region::ResizeHandle => self.begin_resize(&id, point),
            Region::Body => {}
        }
        Some(id)
    }

    pub fn begin_drag(&mut self, id: &str, pointer: Point) {
        self.begin(id, |geometry| Gesture::begin_drag(geometry, pointer));
    }

    pub fn begin_resize(&mut self, id: &str, pointer: Point) {
        self.begin(id, |geometry| Gesture::begin_resize(geometry, pointer));
    }

    pub fn pointer_move(&mut self, pointer: Point) -> Option<Geometry> {
        let viewport = self.viewport;
        let id = self.captured.as_deref()?;
        let window = self.windows.get_mut(id)?;
        let gesture = window.gesture?;
        window.geometry = gesture.apply(&window.geometry, pointer, viewport, window.min_size);
        Some(window.geometry)
    }

    pub fn pointer_up(&mut self) {
        if let Some(id) = self.captured.take() {
            if let Some(window) = self.windows.get_mut(&id) {
                window.gesture = None;
            }
        }
    }

    fn begin(&mut self, id: &str, start: impl FnOnce(&Geometry) -> Gesture) {
        // The pointer belongs to one window at a time.
        if let Some(previous) = self.captured.take() {
            if let Some(window) = self.windows.get_mut(&previous) {
                window.gesture = None;
            }
        }
        if let Some(window) = self.windows.get_mut(id) {
            window.gesture = Some(start(&window.geometry));
            self.captured = Some(id.to_string());
        }
    }

    fn register(&mut self, id: &str, mut geometry: Geometry, min_size: Size) -> u64 {
        geometry.clamp_position(self.viewport);
        geometry.clamp_size(self.viewport, min_size);
        let top = self.max_z_excluding(id);
        self.windows.insert(
            id.to_string(),
            WindowEntry {
                id: id.to_string(),
                z_order: 0,
                geometry,
                min_size,
                gesture: None,
            },
        );
        match top {
            Some(top) => self.raise(id, top),
            None => 0,
        }
    }

    fn raise(&mut self, id: &str, top: u64) -> u64 {
        let next = top + 1;
        let z = if next > self.z_ceiling {
            self.compact_below(id)
        } else {
            next
        };
        if let Some(window) = self.windows.get_mut(id) {
            window.z_order = z;
        }
        z
    }

    /// Renumber every window except `front` to 0..n-2 in current order; `front` gets n-1.
    fn compact_below(&mut self, front: &str) -> u64 {
        let mut others: Vec<(u64, WindowId)> = self
            .windows
            .values()
            .filter(|w| w.id != front)
            .map(|w| (w.z_order, w.id.clone()))
            .collect();
        others.sort();

        debug!("compacting z-order of {} windows", others.len() + 1);
        for (rank, (_, id)) in others.iter().enumerate() {
            if let Some(window) = self.windows.get_mut(id) {
                window.z_order = rank as u64;
            }
        }
        others.len() as u64
    }

    fn max_z_excluding(&self, id: &str) -> Option<u64> {
        self.windows
            .values()
            .filter(|w| w.id != id)
            .map(|w| w.z_order)
            .max()
    }
}
