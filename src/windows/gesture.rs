use serde::{Deserialize, Serialize};

use super::geometry::{Geometry, Point, Size};

/// In-progress pointer interaction. A window holds at most one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Gesture {
    Drag {
        /// Pointer position relative to the window origin at pointer-down.
        offset: Point,
    },
    Resize {
        start_size: Size,
        start_pointer: Point,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    ResizeHandle,
    Body,
}

pub(crate) fn hit_region(
    geometry: &Geometry,
    point: Point,
    header_height: i32,
    handle: i32,
) -> Option<Region> {
    if !geometry.contains(point) {
        return None;
    }
    if point.x >= geometry.right() - handle && point.y >= geometry.bottom() - handle {
        return Some(Region::ResizeHandle);
    }
    if point.y < geometry.position.y + header_height {
        return Some(Region::Header);
    }
    Some(Region::Body)
}

impl Gesture {
    pub(crate) fn begin_drag(geometry: &Geometry, pointer: Point) -> Self {
        Gesture::Drag {
            offset: pointer - geometry.position,
        }
    }

    pub(crate) fn begin_resize(geometry: &Geometry, pointer: Point) -> Self {
        Gesture::Resize {
            start_size: geometry.size,
            start_pointer: pointer,
        }
    }

    /// Geometry after moving the pointer to `pointer`, clamped to `viewport`.
    pub(crate) fn apply(
        &self,
        geometry: &Geometry,
        pointer: Point,
        viewport: Size,
        min_size: Size,
    ) -> Geometry {
        let mut next = *geometry;
        match *self {
            Gesture::Drag { offset } => {
                next.position = pointer - offset;
                next.clamp_position(viewport);
            }
            Gesture::Resize {
                start_size,
                start_pointer,
            } => {
                let delta = pointer - start_pointer;
                next.size = Size::new(
                    (start_size.width + delta.x).max(min_size.width),
                    (start_size.height + delta.y).max(min_size.height),
                );
                next.clamp_size(viewport, min_size);
            }
        }
        next
    }
}
