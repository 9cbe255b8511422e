pub mod log_entry;
pub mod process_info;
pub mod project;
pub mod quick_action;
pub mod status;

pub use log_entry::*;
pub use process_info::*;
pub use project::*;
pub use quick_action::*;
pub use status::*;
