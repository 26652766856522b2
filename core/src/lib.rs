pub mod catalog;
pub mod config;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod tasks;

pub use catalog::{Catalog, CatalogStats, DirectoryInfo, VideoRecord, MAX_SCAN_DEPTH};
pub use config::{Config, MediaRoot, ServerConfig, StreamSettings, VideoConfig};
pub use error::{Result, StreamError};
pub use flow::connection_limiter::ConnectionLimiter;
pub use flow::token_bucket::TokenBucket;
pub use flow::{AccessOutcome, ConnectionGuard, FlowControlStats, StreamGate};
pub use metadata::{MetadataExtractor, VideoMetadata};
pub use tasks::scheduler::{Scheduler, SchedulerConfig};
pub use tasks::store::{TaskStats, TaskStore};
pub use tasks::{TaskRecord, TaskStatus, VIDEO_DELETION};
