pub mod config;
pub mod listener;
pub mod logging;
pub mod util;

pub use config::AppConfig;
pub use listener::capture::Input;
pub use listener::packet::*;
pub use listener::parser::RecordSink;
pub use listener::status::{IngestError, PipelineStatus};
pub use listener::tracking::*;
pub use listener::Pipeline;
