pub mod manager;
pub mod notifiers;
pub mod traits;

pub use manager::{NotificationSinkRef, NotifierHub};
pub use traits::{ErrorReport, NotificationSink, NotifyError, Severity};
