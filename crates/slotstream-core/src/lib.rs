//! Core types for the slotstream TDMA framing library
//!
//! This crate provides the value types shared by every stream operator:
//! wall-clock timestamps, offset-keyed stream tags, the context tag log,
//! and the interval sets the slot scheduler is built on.

/// Git version string, set at compile time
pub const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");
/// Crate version followed by git version string, e.g., "0.3.2-aabbccdd"
pub const STACK_VERSION: &str = const_format::formatcp!("{}-{}", env!("CARGO_PKG_VERSION"), GIT_VERSION);

pub mod context_tags;
pub mod debug;
pub mod dsp_types;
pub mod error;
pub mod intervals;
pub mod tags;
pub mod timestamp;

// Re-export commonly used items
pub use context_tags::ContextTagManager;
pub use dsp_types::*;
pub use error::BlockConfigError;
pub use intervals::{Interval, IntervalSet, SeparateIntervalSet};
pub use tags::{StreamTag, TagValue};
pub use timestamp::Timestamp;

/// Channel number carried by `dig_chan` context tags
pub type ChannelNum = i64;
