pub mod detector;
pub mod dispatcher;
pub mod metrics;
pub mod refresh;
pub mod scheduler;

pub use detector::{DetectionReport, DetectionService, TransitionDetector};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use metrics::Metrics;
pub use refresh::RefreshService;
pub use scheduler::{ReminderScheduler, REMINDER_OFFSETS_MIN};
