pub mod merger;
pub mod parameters;

pub use merger::{apply_probe_statuses, endpoint_id, Consolidator};
pub use parameters::{record_parameter, sort_parameters};
