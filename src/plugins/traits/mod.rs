pub mod notifier;

pub use notifier::{ErrorReport, NotificationSink, NotifyError, Severity};
