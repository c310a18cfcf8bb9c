mod parallel;

pub use parallel::{MAX_ACTIVE_TRANSFERS, MAX_CONSECUTIVE_ERRORS};
