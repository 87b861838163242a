//! Statistics for restreams and endpoints

pub mod bitrate;
pub mod metrics;

pub use bitrate::BitrateFilter;
pub use metrics::ConnStats;
