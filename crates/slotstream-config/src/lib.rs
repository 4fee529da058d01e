//! Configuration for the slotstream cut tool

pub mod cut_config;
pub mod toml_config;

pub use cut_config::{CfgInput, CfgLog, CfgOutput, CfgSchedule, CfgTime, CutConfig};
