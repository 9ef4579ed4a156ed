pub mod business;
pub mod http;

pub use business::{AppInfo, BusinessMetrics};
pub use http::{HttpMetrics, RequestOutcome};
