use serde::Deserialize;
use slotstream_core::Timestamp;

/// Input stream parameters
#[derive(Debug, Clone, Deserialize)]
pub struct CfgInput {
    /// Interleaved f32 IQ file
    pub file: String,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Stream start time, integer seconds
    #[serde(default)]
    pub start_int_s: i64,
    /// Stream start time, fractional seconds
    #[serde(default)]
    pub start_frac_s: f64,
    /// Repeat the file when EOF is reached
    #[serde(default)]
    pub repeat: bool,
}

impl CfgInput {
    pub fn start_time(&self) -> Timestamp {
        Timestamp::new(self.start_int_s, self.start_frac_s)
    }
}

/// Time correction applied ahead of the slot selector
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CfgTime {
    /// Integer-second receiver clock offset, applied via the
    /// time_tag_shift control port at startup
    #[serde(default)]
    pub integer_offset: i64,
}

/// The repeating frame schedule
#[derive(Debug, Clone, Deserialize)]
pub struct CfgSchedule {
    /// Frame period in seconds
    pub frame_len: f64,
    /// Slot lengths in seconds, one per slot
    pub slot_lens: Vec<f64>,
    /// Slot offsets from the frame start, one per slot
    pub slot_offsets: Vec<f64>,
    /// Schedule epoch, integer seconds
    #[serde(default)]
    pub frame_t0_int_s: i64,
    /// Schedule epoch, fractional seconds
    #[serde(default)]
    pub frame_t0_frac_s: f64,
}

impl CfgSchedule {
    pub fn frame_t0(&self) -> Timestamp {
        Timestamp::new(self.frame_t0_int_s, self.frame_t0_frac_s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CfgOutput {
    /// Output IQ file for the selected samples
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CfgLog {
    /// Tag log file, one line per tag crossing the output
    pub tag_file: String,
    /// Verbose debug log file
    #[serde(default)]
    pub debug_file: Option<String>,
}

/// Root configuration of the cut tool
#[derive(Debug, Clone, Deserialize)]
pub struct CutConfig {
    pub input: CfgInput,
    #[serde(default)]
    pub time: CfgTime,
    pub schedule: CfgSchedule,
    pub output: CfgOutput,
    pub log: Option<CfgLog>,
}
