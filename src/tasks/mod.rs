pub mod registry;
pub mod state;

pub use registry::TaskRegistry;
pub use state::ApplyReport;
