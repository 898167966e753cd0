pub mod cache;
pub mod dashboard;
pub mod notifier;
pub mod watch;

pub use cache::{Merge, ScanCache};
pub use dashboard::DashboardSummary;
pub use notifier::{Notifier, Toast, ToastLevel, TracingNotifier};
pub use watch::{ScanListWatch, ScanWatch};
