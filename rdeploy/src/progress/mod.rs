//! Progress events for in-flight deployments

pub mod broadcaster;
pub mod event;
pub mod reporter;

pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use event::{ProgressEvent, ProgressSink, ProgressStatus};
pub use reporter::ProgressReporter;
