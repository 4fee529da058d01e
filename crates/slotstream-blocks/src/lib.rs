//! Stream operators for timestamp-driven TDMA framing
//!
//! Each operator consumes a typed sample stream with attached stream
//! tags and produces another such stream (or, for sinks, messages).
//! Operators that change the sample rate or drop samples reconstruct
//! their output tags from scratch; nothing is auto-propagated.

pub mod clock_recovery;
pub mod framer_sink;
pub mod interp;
pub mod pipeline;
pub mod sample_file;
pub mod selector;
pub mod slot_selector;
pub mod stream;
pub mod tag_logger;
pub mod time_shift;

// Re-export commonly used items
pub use clock_recovery::ClockRecovery;
pub use framer_sink::FramerSink;
pub use pipeline::Pipeline;
pub use selector::InputSelector;
pub use slot_selector::{Schedule, ScheduleHandle, SlotSelector};
pub use stream::{StreamOperator, StreamWindow, WorkResult};
pub use tag_logger::TagLogger;
pub use time_shift::TimeTagShifter;
