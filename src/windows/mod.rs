pub mod geometry;
pub mod gesture;
pub mod stack;

pub use geometry::{Geometry, Point, Size};
pub use gesture::{Gesture, Region};
pub use stack::{WindowEntry, WindowId, WindowKind, WindowStack};
