pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;

pub use metrics::{AppInfo, BusinessMetrics, HttpMetrics};
pub use middleware::{RequestGuard, track_requests};
pub use router::{AppState, app_router, metrics_router};
