pub mod backend;
pub mod noop;
pub mod queue;
pub mod router;
pub mod webhook;

pub use backend::{CaptureNotice, NotifySink};
pub use queue::NoticeQueue;
pub use router::NotifyRouter;
