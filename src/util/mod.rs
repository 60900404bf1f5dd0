pub mod time_window;

pub use time_window::{bucket_start, TimeWindow, WindowSnapshot};
