pub mod log_aggregator;
pub mod process_table;
pub mod project_scanner;
pub mod project_store;
pub mod quick_actions;
pub mod registry;
pub mod status_tracker;
pub mod supervisor;

pub use log_aggregator::*;
pub use process_table::*;
pub use project_scanner::*;
pub use project_store::*;
pub use quick_actions::*;
pub use registry::*;
pub use status_tracker::*;
pub use supervisor::*;
