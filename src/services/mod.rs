//! Service layer separating file system and progress concerns from the
//! pipelines

pub mod io;
pub mod progress;
pub mod resize;

pub use io::{ImageIOService, SUPPORTED_EXTENSIONS};
pub use progress::{
    ChannelProgressReporter, InstallRequest, LogEntry, LogLevel, NoOpProgressReporter,
    ProgressReporter, RunEvent,
};
pub use resize::apply_resize;
