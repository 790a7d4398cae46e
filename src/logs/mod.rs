pub mod buffer;
pub mod filter;
pub mod scroll;

pub use buffer::{LogBuffer, VisibleLine};
pub use filter::{FilterPatch, FilterState};
pub use scroll::{ScrollAction, ScrollArbiter};
