//! Live reading state: the latest-reading store, the producer feeds that fill
//! it, and replay of recorded traces through those feeds

pub mod feeds;
pub mod replay;
pub mod store;

pub use feeds::{FeedError, FeedStats, GpsSender, ReadingFeeds, ScanSender};
pub use replay::{parse_trace, replay, ReplayStats, TraceError, TraceEvent, TraceRecord};
pub use store::{LatestReadingStore, StoreSnapshot};
