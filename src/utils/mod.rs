pub mod error;
pub mod fmt;

pub use error::{ProbeError, Result};
pub use fmt::{bytes_to_gb, sanitize_metric_name};
