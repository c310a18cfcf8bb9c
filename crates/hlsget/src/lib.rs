pub mod download;
pub mod error;
pub mod fetch;
pub mod m3u8;
pub mod merge;
pub mod meter;
pub mod util;

pub use download::{MAX_ACTIVE_TRANSFERS, MAX_CONSECUTIVE_ERRORS};
pub use error::{HlsgetError, HlsgetResult};
pub use fetch::{derive_filename_from_url, Downloader, FetchResults, PathUrl, TransferError};
pub use m3u8::{base_url, is_absolute_url, is_m3u8, Playlist, UrlProperties};
pub use meter::ProgressMeter;
